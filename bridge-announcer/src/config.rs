use envconfig::Envconfig;

use bridge_common::config::{EnvMsDuration, KafkaConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "http://127.0.0.1:5984/")]
    pub couchdb_url: String,

    #[envconfig(default = ".couchdb_seq_id")]
    pub seqid_file: String,

    #[envconfig(default = "1000")]
    pub batch_size: usize,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
