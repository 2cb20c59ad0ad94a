/// Counter for records received from Kafka
pub const RECORDS_RECEIVED_COUNTER: &str = "messaging_kafka_records_received_total";

/// Counter for errors returned while receiving from Kafka
pub const RECEIVE_ERRORS_COUNTER: &str = "messaging_kafka_receive_errors_total";

/// Gauge for partitions currently paused because of backpressure
pub const PAUSED_PARTITIONS_GAUGE: &str = "messaging_kafka_paused_partitions";

/// Counter for offset commits (with status label: success/failure)
pub const OFFSET_COMMITS_COUNTER: &str = "messaging_kafka_offset_commits_total";

/// Counter for dead letters published (with status label: success/failure)
pub const DEAD_LETTERS_PUBLISHED_COUNTER: &str = "messaging_kafka_dead_letters_published_total";
