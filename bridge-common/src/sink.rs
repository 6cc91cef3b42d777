use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::messages::UpdateMessage;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize update message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to publish update message: {0}")]
    Kafka(#[from] KafkaError),
    #[error("publish delivery was cancelled")]
    Cancelled,
}

/// Where the announcer sends update messages.
#[async_trait]
pub trait UpdateSink {
    /// Publish one message and wait for the broker to confirm delivery.
    async fn publish(&self, message: &UpdateMessage) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: UpdateSink + Send + Sync> UpdateSink for Arc<T> {
    async fn publish(&self, message: &UpdateMessage) -> Result<(), PublishError> {
        (**self).publish(message).await
    }
}

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> anyhow::Result<KafkaSink> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer = client_config.create()?;

        // Ping the cluster to make sure we can reach brokers
        producer
            .client()
            .fetch_metadata(None, Timeout::After(Duration::from_secs(10)))?;
        info!("connected to Kafka brokers");

        Ok(KafkaSink {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }

    /// Flush buffered messages, typically right before process exit.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(Timeout::After(timeout))
    }
}

#[async_trait]
impl UpdateSink for KafkaSink {
    async fn publish(&self, message: &UpdateMessage) -> Result<(), PublishError> {
        let payload = serde_json::to_string(message)?;
        debug!(topic = %self.topic, "announcing update message");

        let record: FutureRecord<'_, str, String> = FutureRecord::to(&self.topic).payload(&payload);

        let delivery = self.producer.send_result(record).map_err(|(e, _)| e)?;
        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(PublishError::Kafka(e)),
            Err(_) => Err(PublishError::Cancelled),
        }
    }
}
