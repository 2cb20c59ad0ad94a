use std::fmt;
use std::time::Instant;

use bytes::Bytes;

/// A single ordered stream: a topic plus a partition number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

/// A raw record as fetched from the broker. The payload holds the encoded
/// envelope; nothing is decoded before it reaches the partition processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Bytes,
}

impl PartitionRecord {
    pub fn new(
        partition: &Partition,
        offset: i64,
        key: Option<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: partition.topic().to_owned(),
            partition: partition.partition_number(),
            offset,
            key,
            payload: payload.into(),
        }
    }
}

/// An enqueued record that has not been handed to a handler yet.
#[derive(Debug)]
pub(crate) struct PendingRecord {
    pub record: PartitionRecord,
    pub enqueued_at: Instant,
}

impl PendingRecord {
    pub fn new(record: PartitionRecord) -> Self {
        Self {
            record,
            enqueued_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_copies_partition_coordinates() {
        let partition = Partition::new("inbox-com.example.orders", 3);
        let record = PartitionRecord::new(&partition, 42, Some("key".to_string()), vec![1, 2]);

        assert_eq!(record.topic, "inbox-com.example.orders");
        assert_eq!(record.partition, 3);
        assert_eq!(record.offset, 42);
        assert_eq!(record.payload.as_ref(), &[1, 2]);
        assert_eq!(partition.to_string(), "inbox-com.example.orders:3");
    }
}
