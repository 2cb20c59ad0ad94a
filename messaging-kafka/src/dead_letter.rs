use async_trait::async_trait;
use messaging::{DeadLetterSink, Message, Topic};
use rdkafka::message::{Header, OwnedHeaders};

use crate::metrics_const::DEAD_LETTERS_PUBLISHED_COUNTER;
use crate::producer::MessageProducer;

pub const FAILURE_HEADER: &str = "x-failure";
pub const ORIGINAL_TOPIC_HEADER: &str = "x-original-topic";

/// Parks failed messages on a dedicated topic. The envelope is published unchanged; the failure
/// and the topic it was consumed from travel as record headers.
pub struct KafkaDeadLetterSink {
    producer: MessageProducer,
    topic: Topic,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: MessageProducer, topic: Topic) -> Self {
        Self { producer, topic }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

fn dead_letter_headers(message: &Message, failure: &anyhow::Error) -> OwnedHeaders {
    let reason = format!("{failure:#}");
    OwnedHeaders::new()
        .insert(Header {
            key: FAILURE_HEADER,
            value: Some(reason.as_str()),
        })
        .insert(Header {
            key: ORIGINAL_TOPIC_HEADER,
            value: Some(message.metadata().topic().name()),
        })
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn publish(&self, message: &Message, failure: &anyhow::Error) -> anyhow::Result<()> {
        let result = self
            .producer
            .send_envelope(
                self.topic.name(),
                message.metadata().partitioning_key(),
                &message.to_envelope(),
                Some(dead_letter_headers(message, failure)),
            )
            .await;

        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(DEAD_LETTERS_PUBLISHED_COUNTER, "status" => status).increment(1);
        result?;
        Ok(())
    }
}
