use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message};
use thiserror::Error;
use tracing::info;

use crate::config::ConsumerConfig;

#[derive(Error, Debug)]
pub enum ConsumeError {
    #[error("kafka consume failed: {0}")]
    Kafka(#[from] KafkaError),
    #[error("received a message with an empty payload")]
    EmptyPayload,
}

/// Single-topic consumer for the update queue.
///
/// Offsets are stored and committed automatically at receipt, so a message is
/// acknowledged before it is processed. A worker that dies mid-update loses
/// that update; the bridge accepts this in exchange for never stalling the
/// receive loop on slow engine calls.
pub struct UpdateConsumer {
    consumer: StreamConsumer,
}

impl UpdateConsumer {
    pub fn new(config: &ConsumerConfig) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("group.id", &config.kafka_consumer_group)
            .set("auto.offset.reset", &config.kafka_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "true");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[config.kafka_topic.as_str()])?;
        info!(topic = %config.kafka_topic, group = %config.kafka_consumer_group, "subscribed");

        Ok(Self { consumer })
    }

    /// Wait for the next message and return its payload bytes.
    pub async fn recv(&self) -> Result<Vec<u8>, ConsumeError> {
        let message = self.consumer.recv().await?;
        let payload = message.payload().ok_or(ConsumeError::EmptyPayload)?;
        Ok(payload.to_vec())
    }
}
