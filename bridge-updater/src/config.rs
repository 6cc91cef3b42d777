use envconfig::Envconfig;

use bridge_common::config::{ConsumerConfig, EnvMsDuration};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3303")]
    pub port: u16,

    #[envconfig(default = "http://127.0.0.1:8080/solr")]
    pub solr_url: String,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "10")]
    pub max_concurrent_jobs: usize,

    #[envconfig(nested = true)]
    pub kafka: ConsumerConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
