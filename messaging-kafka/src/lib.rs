//! Kafka ingestion for the `messaging` partition processing engine.
//!
//! [`InboxConsumer`] subscribes to a service inbox, owns one partition processor per partition,
//! pauses and resumes fetching per partition as backlogs grow and drain, and commits processor
//! watermarks back to Kafka. [`MessageProducer`] publishes outbound messages as envelopes, and
//! [`KafkaDeadLetterSink`] parks messages that could not be handled.

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod metrics_const;
pub mod partitions;
pub mod producer;

pub use config::Config;
pub use consumer::InboxConsumer;
pub use dead_letter::KafkaDeadLetterSink;
pub use error::{ConsumerError, ProduceError};
pub use partitions::PartitionProcessors;
pub use producer::{create_kafka_producer, MessageProducer};
