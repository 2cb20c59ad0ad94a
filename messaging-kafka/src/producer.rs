use std::time::Duration;

use messaging::{Envelope, Message};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ProduceError;

pub async fn create_kafka_producer(config: &Config) -> Result<FutureProducer, KafkaError> {
    let client_config = config.producer_client_config();
    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer = client_config.create()?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

/// Publishes messages as envelopes, keyed by their partitioning key.
#[derive(Clone)]
pub struct MessageProducer {
    producer: FutureProducer,
}

impl MessageProducer {
    pub fn new(producer: FutureProducer) -> Self {
        Self { producer }
    }

    /// Send `message` to its destination topic.
    pub async fn send(&self, message: &Message) -> Result<(), ProduceError> {
        let metadata = message.metadata();
        if metadata.topic().is_empty() {
            return Err(ProduceError::MissingTopic);
        }

        self.send_envelope(
            metadata.topic().name(),
            metadata.partitioning_key(),
            &message.to_envelope(),
            None,
        )
        .await?;
        debug!(
            topic = %metadata.topic(),
            message_id = metadata.message_id(),
            message_type = %metadata.message_type(),
            "Sent message"
        );
        Ok(())
    }

    pub async fn send_envelope(
        &self,
        topic: &str,
        partitioning_key: &str,
        envelope: &Envelope,
        headers: Option<OwnedHeaders>,
    ) -> Result<(), ProduceError> {
        let payload = envelope.to_bytes();
        let key = if partitioning_key.is_empty() {
            None
        } else {
            Some(partitioning_key)
        };
        let record = FutureRecord {
            topic,
            key,
            payload: Some(&payload),
            timestamp: None,
            partition: None,
            headers,
        };

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((e, _)) => return Err(ProduceError::Kafka { error: e }),
        };

        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(ProduceError::Kafka { error: e }),
            Err(_) => Err(ProduceError::Canceled),
        }
    }

    /// Wait for in-flight deliveries before shutting down.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(timeout)
    }
}
