use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

/// Broker settings for the publishing side. `KAFKA_HOSTS` and `KAFKA_TOPIC`
/// carry no defaults: a deployment without them is misconfigured.
#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    pub kafka_hosts: String,

    pub kafka_topic: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

/// Broker settings for the consuming side. The consumer group stands in for
/// the queue name: every group bound to the topic receives every message.
#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    pub kafka_hosts: String,

    pub kafka_topic: String,

    pub kafka_consumer_group: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "earliest")]
    pub kafka_offset_reset: String, // earliest, latest
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millisecond_durations() {
        let parsed: EnvMsDuration = "1500".parse().unwrap();
        assert_eq!(parsed.0, time::Duration::from_millis(1500));

        assert_eq!("abc".parse::<EnvMsDuration>(), Err(ParseEnvMsDurationError));
    }
}
