use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use messaging::{FailedMessageProcessor, Partition, PartitionRecord, TypeDictionary};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{Message as _, Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ConsumerError;
use crate::metrics_const::{
    OFFSET_COMMITS_COUNTER, PAUSED_PARTITIONS_GAUGE, RECEIVE_ERRORS_COUNTER,
    RECORDS_RECEIVED_COUNTER,
};
use crate::partitions::PartitionProcessors;

/// Consumes a service inbox and feeds it through one partition processor per partition.
///
/// Fetching from a partition is paused while its processor is over its backlog ceiling.
/// Offsets are committed from processor watermarks on an interval and once more on shutdown.
pub struct InboxConsumer {
    consumer: StreamConsumer,
    processors: PartitionProcessors,
    commit_interval: Duration,
    shutdown_timeout: Duration,
}

impl InboxConsumer {
    pub fn new(
        config: &Config,
        type_dictionary: Arc<TypeDictionary>,
        failed_message_processor: Arc<dyn FailedMessageProcessor>,
    ) -> Result<Self, ConsumerError> {
        type_dictionary.validate()?;

        let consumer: StreamConsumer = config.consumer_client_config().create()?;
        consumer.subscribe(&[config.kafka_consumer_topic.as_str()])?;
        info!(
            topic = %config.kafka_consumer_topic,
            group = %config.kafka_consumer_group,
            "Subscribed to inbox"
        );

        Ok(Self {
            consumer,
            processors: PartitionProcessors::new(
                type_dictionary,
                failed_message_processor,
                config.processor_config(),
            ),
            commit_interval: config.commit_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Consume until `shutdown` is cancelled or a partition halts on an unregistered message
    /// type. Either way every processor is stopped and the final watermarks are committed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        info!("Starting inbox consumption...");

        let InboxConsumer {
            consumer,
            mut processors,
            commit_interval,
            shutdown_timeout,
        } = self;
        let mut commit_interval = tokio::time::interval(commit_interval);
        let mut paused: HashSet<Partition> = HashSet::new();
        let mut unacknowledged: HashMap<Partition, i64> = HashMap::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, starting graceful shutdown");
                    break Ok(());
                }

                received = consumer.recv() => {
                    match received {
                        Ok(message) => {
                            metrics::counter!(RECORDS_RECEIVED_COUNTER).increment(1);
                            processors.enqueue(to_record(&message));
                        }
                        Err(e) => {
                            metrics::counter!(RECEIVE_ERRORS_COUNTER).increment(1);
                            warn!(error = ?e, "Error receiving from Kafka");
                        }
                    }
                    update_flow_control(&consumer, &processors, &mut paused);
                    if let Some(halted) = halted_partition(&processors) {
                        break Err(halted);
                    }
                }

                _ = commit_interval.tick() => {
                    update_flow_control(&consumer, &processors, &mut paused);
                    commit_watermarks(&consumer, &processors, &mut unacknowledged);
                    if let Some(halted) = halted_partition(&processors) {
                        break Err(halted);
                    }
                }
            }
        };

        processors.shutdown(shutdown_timeout).await;
        commit_watermarks(&consumer, &processors, &mut unacknowledged);
        info!("Graceful shutdown completed");

        result
    }
}

fn halted_partition(processors: &PartitionProcessors) -> Option<ConsumerError> {
    let (partition, source) = processors.configuration_error()?;
    error!(
        partition = %partition,
        error = ?source,
        "Partition halted, stopping consumer"
    );
    Some(ConsumerError::PartitionHalted { partition, source })
}

fn to_record(message: &BorrowedMessage<'_>) -> PartitionRecord {
    PartitionRecord {
        topic: message.topic().to_owned(),
        partition: message.partition(),
        offset: message.offset(),
        key: record_key(message.key()),
        payload: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
    }
}

/// Keys that are not valid UTF-8 are dropped so the envelope's partitioning key applies.
fn record_key(key: Option<&[u8]>) -> Option<String> {
    let key = key?;
    match std::str::from_utf8(key) {
        Ok(key) => Some(key.to_owned()),
        Err(e) => {
            debug!(error = ?e, "Record key is not UTF-8, using the envelope key");
            None
        }
    }
}

fn partition_list(partitions: &[Partition]) -> TopicPartitionList {
    let mut list = TopicPartitionList::new();
    for partition in partitions {
        list.add_partition(partition.topic(), partition.partition_number());
    }
    list
}

fn update_flow_control(
    consumer: &StreamConsumer,
    processors: &PartitionProcessors,
    paused: &mut HashSet<Partition>,
) {
    let to_pause = processors.partitions_to_pause(paused);
    if !to_pause.is_empty() {
        match consumer.pause(&partition_list(&to_pause)) {
            Ok(()) => {
                debug!(partitions = ?to_pause, "Paused fetching");
                paused.extend(to_pause);
            }
            Err(e) => warn!(error = ?e, "Failed to pause partitions"),
        }
    }

    let to_resume = processors.partitions_to_resume(paused);
    if !to_resume.is_empty() {
        match consumer.resume(&partition_list(&to_resume)) {
            Ok(()) => {
                debug!(partitions = ?to_resume, "Resumed fetching");
                for partition in &to_resume {
                    paused.remove(partition);
                }
            }
            Err(e) => warn!(error = ?e, "Failed to resume partitions"),
        }
    }

    metrics::gauge!(PAUSED_PARTITIONS_GAUGE).set(paused.len() as f64);
}

/// Commit every watermark that moved. Offsets whose commit fails are kept and retried with the
/// next commit.
fn commit_watermarks(
    consumer: &StreamConsumer,
    processors: &PartitionProcessors,
    unacknowledged: &mut HashMap<Partition, i64>,
) {
    for (partition, offset) in processors.committable_offsets() {
        unacknowledged
            .entry(partition)
            .and_modify(|current| *current = (*current).max(offset))
            .or_insert(offset);
    }
    if unacknowledged.is_empty() {
        return;
    }

    let mut list = TopicPartitionList::new();
    for (partition, offset) in unacknowledged.iter() {
        if let Err(e) = list.add_partition_offset(
            partition.topic(),
            partition.partition_number(),
            Offset::Offset(*offset),
        ) {
            warn!(partition = %partition, error = ?e, "Invalid commit offset");
        }
    }

    match consumer.commit(&list, CommitMode::Sync) {
        Ok(()) => {
            info!("Committed offsets for {} partitions", unacknowledged.len());
            metrics::counter!(OFFSET_COMMITS_COUNTER, "status" => "success").increment(1);
            unacknowledged.clear();
        }
        Err(e) => {
            metrics::counter!(OFFSET_COMMITS_COUNTER, "status" => "failure").increment(1);
            warn!("Failed to commit offsets: {e:#}");
        }
    }
}
