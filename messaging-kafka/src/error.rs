use messaging::{Partition, TypeDictionaryError};
use rdkafka::error::KafkaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("type dictionary is incomplete: {0}")]
    InvalidTypeDictionary(#[from] TypeDictionaryError),
    #[error("partition {partition} halted on an unregistered message type")]
    PartitionHalted {
        partition: Partition,
        #[source]
        source: TypeDictionaryError,
    },
}

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error("message has no destination topic")]
    MissingTopic,
    #[error("failed to produce to kafka: {error}")]
    Kafka { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    Canceled,
}
