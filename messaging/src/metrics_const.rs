// ==== Partition processor metrics ====
/// Counter for records handed to a partition processor
pub const RECORDS_ENQUEUED_COUNTER: &str = "messaging_records_enqueued_total";

/// Counter for records ignored because their processor was already stopping
pub const RECORDS_DROPPED_COUNTER: &str = "messaging_records_dropped_total";

/// Counter for records that could not be decoded into a message (with reason label)
pub const PARSE_FAILURES_COUNTER: &str = "messaging_parse_failures_total";

/// Counter for handler invocations (with message_type and outcome labels)
pub const HANDLER_ATTEMPTS_COUNTER: &str = "messaging_handler_attempts_total";

/// Counter for retries scheduled by the failure disposition
pub const HANDLER_RETRIES_COUNTER: &str = "messaging_handler_retries_total";

/// Histogram for a single handler invocation
pub const HANDLER_DURATION_HISTOGRAM: &str = "messaging_handler_duration_seconds";

/// Histogram for time between enqueue and first handler invocation
pub const QUEUE_LATENCY_HISTOGRAM: &str = "messaging_queue_latency_seconds";

/// Gauge for unprocessed records per partition
pub const QUEUE_DEPTH_GAUGE: &str = "messaging_queue_depth";

/// Gauge for the last offset taken for commit per partition
pub const COMMIT_OFFSET_GAUGE: &str = "messaging_commit_offset";

// ==== Failure disposition metrics ====
/// Counter for messages given up on without being handled
pub const DISCARDED_MESSAGES_COUNTER: &str = "messaging_discarded_messages_total";

/// Counter for messages moved to the dead letter sink
pub const DEAD_LETTERED_MESSAGES_COUNTER: &str = "messaging_dead_lettered_messages_total";
