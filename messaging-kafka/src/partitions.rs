//! The set of partition processors owned by one consumer.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use messaging::{
    FailedMessageProcessor, Partition, PartitionProcessor, PartitionRecord, ProcessorConfig,
    TypeDictionary, TypeDictionaryError,
};
use tracing::info;

pub struct PartitionProcessors {
    type_dictionary: Arc<TypeDictionary>,
    failed_message_processor: Arc<dyn FailedMessageProcessor>,
    config: ProcessorConfig,
    processors: HashMap<Partition, PartitionProcessor>,
}

impl PartitionProcessors {
    pub fn new(
        type_dictionary: Arc<TypeDictionary>,
        failed_message_processor: Arc<dyn FailedMessageProcessor>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            type_dictionary,
            failed_message_processor,
            config,
            processors: HashMap::new(),
        }
    }

    /// Hand a record to its partition's processor, creating the processor on first sight.
    pub fn enqueue(&mut self, record: PartitionRecord) {
        let partition = Partition::new(record.topic.clone(), record.partition);
        let processor = self.processors.entry(partition).or_insert_with_key(|partition| {
            info!(partition = %partition, "Creating partition processor");
            PartitionProcessor::new(
                partition.clone(),
                self.type_dictionary.clone(),
                self.failed_message_processor.clone(),
                self.config,
            )
        });
        processor.enqueue(record);
    }

    pub fn get(&self, partition: &Partition) -> Option<&PartitionProcessor> {
        self.processors.get(partition)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Partitions over their backlog ceiling that are not paused yet.
    pub fn partitions_to_pause(&self, paused: &HashSet<Partition>) -> Vec<Partition> {
        self.processors
            .iter()
            .filter(|(partition, processor)| !paused.contains(*partition) && processor.is_paused())
            .map(|(partition, _)| partition.clone())
            .collect()
    }

    /// Paused partitions whose backlog drained back to the ceiling.
    pub fn partitions_to_resume(&self, paused: &HashSet<Partition>) -> Vec<Partition> {
        paused
            .iter()
            .filter(|partition| {
                self.processors
                    .get(*partition)
                    .map_or(true, |processor| processor.should_resume())
            })
            .cloned()
            .collect()
    }

    /// Watermarks that moved since the last call, one per partition.
    pub fn committable_offsets(&self) -> Vec<(Partition, i64)> {
        self.processors
            .iter()
            .filter_map(|(partition, processor)| {
                processor
                    .commit_offset_and_clear()
                    .map(|offset| (partition.clone(), offset))
            })
            .collect()
    }

    /// The first partition that halted on an unregistered message type, if any.
    pub fn configuration_error(&self) -> Option<(Partition, TypeDictionaryError)> {
        self.processors.iter().find_map(|(partition, processor)| {
            processor
                .configuration_error()
                .map(|e| (partition.clone(), e))
        })
    }

    /// Stop every processor, then wait for their handlers in parallel, each bounded by `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        for processor in self.processors.values() {
            processor.stop_processing();
        }
        join_all(
            self.processors
                .values()
                .map(|processor| processor.wait_for_handlers_to_terminate(timeout)),
        )
        .await;
        info!(
            partitions = self.processors.len(),
            "All partition processors terminated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::{DiscardFailedMessages, Envelope};

    const TOPIC: &str = "inbox-com.example.orders";

    fn processors(max_messages_in_flight: usize) -> PartitionProcessors {
        PartitionProcessors::new(
            Arc::new(TypeDictionary::default()),
            Arc::new(DiscardFailedMessages),
            ProcessorConfig {
                max_messages_in_flight,
            },
        )
    }

    // Undecodable, so it is consumed without a handler.
    fn garbage(partition: i32, offset: i64) -> PartitionRecord {
        PartitionRecord::new(
            &Partition::new(TOPIC, partition),
            offset,
            None,
            vec![0xff, 0xff, 0xff],
        )
    }

    fn unregistered(partition: i32, offset: i64) -> PartitionRecord {
        let envelope = Envelope {
            message_id: "m-1".to_string(),
            message_type: "orders.Unregistered".to_string(),
            ..Default::default()
        };
        PartitionRecord::new(
            &Partition::new(TOPIC, partition),
            offset,
            None,
            envelope.to_bytes(),
        )
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn test_one_processor_per_partition() {
        let mut processors = processors(10);

        processors.enqueue(garbage(0, 1));
        processors.enqueue(garbage(1, 7));
        processors.enqueue(garbage(0, 2));

        assert_eq!(processors.len(), 2);
        assert!(processors.get(&Partition::new(TOPIC, 1)).is_some());
        assert!(processors.get(&Partition::new(TOPIC, 2)).is_none());
    }

    #[tokio::test]
    async fn test_committable_offsets_per_partition() {
        let mut processors = processors(10);
        processors.enqueue(garbage(0, 1));
        processors.enqueue(garbage(0, 2));
        processors.enqueue(garbage(1, 7));

        wait_for(|| {
            [0, 1].iter().all(|partition| {
                processors
                    .get(&Partition::new(TOPIC, *partition))
                    .is_some_and(|processor| processor.number_of_unprocessed_messages() == 0)
            })
        })
        .await;

        let mut offsets = processors.committable_offsets();
        offsets.sort_by_key(|(partition, _)| partition.partition_number());
        assert_eq!(
            offsets,
            vec![
                (Partition::new(TOPIC, 0), 3),
                (Partition::new(TOPIC, 1), 8)
            ]
        );
        assert!(processors.committable_offsets().is_empty());
    }

    #[tokio::test]
    async fn test_halted_partition_is_reported() {
        let mut processors = processors(10);
        processors.enqueue(unregistered(3, 40));

        wait_for(|| processors.configuration_error().is_some()).await;

        let (partition, error) = processors.configuration_error().unwrap();
        assert_eq!(partition, Partition::new(TOPIC, 3));
        assert!(matches!(error, TypeDictionaryError::UnknownDecoder(_)));
        assert!(processors.committable_offsets().is_empty());
    }

    #[tokio::test]
    async fn test_resume_unknown_paused_partition() {
        let processors = processors(10);
        let paused = HashSet::from([Partition::new(TOPIC, 5)]);

        assert!(processors.partitions_to_pause(&paused).is_empty());
        assert_eq!(
            processors.partitions_to_resume(&paused),
            vec![Partition::new(TOPIC, 5)]
        );
    }

    #[tokio::test]
    async fn test_shutdown_terminates_every_processor() {
        let mut processors = processors(10);
        processors.enqueue(garbage(0, 1));
        processors.enqueue(garbage(1, 1));

        processors.shutdown(Duration::from_secs(1)).await;

        assert!(processors
            .processors
            .values()
            .all(|processor| processor.is_terminated()));
    }
}
