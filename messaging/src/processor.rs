//! # Partition processor
//!
//! Owns the backlog of one partition and feeds it to handlers strictly in offset order from a
//! single spawned worker task. The ingestion side only ever touches the queue and the commit
//! watermark under a short-lived lock, so [`PartitionProcessor::enqueue`] never waits on a
//! handler.
//!
//! A record reaches a terminal outcome when its handler succeeds, when the failure disposition
//! gives up on it, or when it can never be decoded. Terminal records advance the commit
//! watermark. Two cases leave the watermark untouched so the record is redelivered after a
//! restart: a retry delay interrupted by [`PartitionProcessor::stop_processing`], and a message
//! type missing from the [`TypeDictionary`], which halts the partition.
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::envelope::Envelope;
use crate::error::{DecodeError, HandlerPanicked, TypeDictionaryError};
use crate::failure::{FailedMessageProcessor, FailureDisposition};
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::metrics_const::{
    COMMIT_OFFSET_GAUGE, HANDLER_ATTEMPTS_COUNTER, HANDLER_DURATION_HISTOGRAM,
    HANDLER_RETRIES_COUNTER, PARSE_FAILURES_COUNTER, QUEUE_DEPTH_GAUGE, QUEUE_LATENCY_HISTOGRAM,
    RECORDS_DROPPED_COUNTER, RECORDS_ENQUEUED_COUNTER,
};
use crate::topic::MessageType;
use crate::type_dictionary::TypeDictionary;
use crate::types::{Partition, PartitionRecord, PendingRecord};

pub const DEFAULT_MAX_MESSAGES_IN_FLIGHT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Backpressure ceiling. A processor holding more unprocessed records than this is paused.
    pub max_messages_in_flight: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_messages_in_flight: DEFAULT_MAX_MESSAGES_IN_FLIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Stopping,
    Terminated,
}

/// The handler invocation currently owned by the worker.
#[derive(Debug, Clone, Copy)]
struct InFlightAttempt {
    offset: i64,
    attempt: u32,
    next_attempt_at: Option<Instant>,
}

#[derive(Debug)]
struct State {
    pending: VecDeque<PendingRecord>,
    in_flight: Option<InFlightAttempt>,
    lifecycle: Lifecycle,
    commit_offset: Option<i64>,
    uncommitted: bool,
    configuration_error: Option<TypeDictionaryError>,
}

impl State {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            lifecycle: Lifecycle::Running,
            commit_offset: None,
            uncommitted: false,
            configuration_error: None,
        }
    }

    fn unprocessed(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }
}

/// State shared between the processor handle and its worker task.
struct Shared {
    partition: Partition,
    labels: [(&'static str, String); 2],
    state: Mutex<State>,
    work_available: Notify,
    stopping: CancellationToken,
}

impl Shared {
    fn record_depth(&self, depth: usize) {
        metrics::gauge!(QUEUE_DEPTH_GAUGE, &self.labels).set(depth as f64);
    }

    fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Running {
                state.lifecycle = Lifecycle::Stopping;
            }
        }
        self.stopping.cancel();
    }
}

pub struct PartitionProcessor {
    shared: Arc<Shared>,
    type_dictionary: Arc<TypeDictionary>,
    config: ProcessorConfig,
    worker_finished: watch::Receiver<bool>,
}

impl PartitionProcessor {
    /// Create the processor and spawn its worker on the current tokio runtime.
    pub fn new(
        partition: Partition,
        type_dictionary: Arc<TypeDictionary>,
        failed_message_processor: Arc<dyn FailedMessageProcessor>,
        config: ProcessorConfig,
    ) -> Self {
        let labels = [
            ("topic", partition.topic().to_owned()),
            ("partition", partition.partition_number().to_string()),
        ];
        let shared = Arc::new(Shared {
            partition,
            labels,
            state: Mutex::new(State::new()),
            work_available: Notify::new(),
            stopping: CancellationToken::new(),
        });
        let (finished_tx, worker_finished) = watch::channel(false);

        let worker = Worker {
            shared: shared.clone(),
            type_dictionary: type_dictionary.clone(),
            failed_message_processor,
        };
        tokio::spawn(async move {
            worker.run().await;
            let _ = finished_tx.send(true);
        });

        Self {
            shared,
            type_dictionary,
            config,
            worker_finished,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.shared.partition
    }

    pub fn type_dictionary(&self) -> &Arc<TypeDictionary> {
        &self.type_dictionary
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Append a record to the backlog. Records arriving after a stop are dropped.
    pub fn enqueue(&self, record: PartitionRecord) {
        let depth = {
            let mut state = self.shared.state.lock();
            if state.lifecycle != Lifecycle::Running {
                drop(state);
                warn!(
                    partition = %self.shared.partition,
                    offset = record.offset,
                    "Dropping record enqueued after processor was stopped"
                );
                metrics::counter!(RECORDS_DROPPED_COUNTER, &self.shared.labels).increment(1);
                return;
            }
            state.pending.push_back(PendingRecord::new(record));
            state.unprocessed()
        };

        metrics::counter!(RECORDS_ENQUEUED_COUNTER, &self.shared.labels).increment(1);
        self.shared.record_depth(depth);
        self.shared.work_available.notify_one();
    }

    /// Pending records plus the one currently being handled, if any.
    pub fn number_of_unprocessed_messages(&self) -> usize {
        self.shared.state.lock().unprocessed()
    }

    pub fn is_paused(&self) -> bool {
        self.number_of_unprocessed_messages() > self.config.max_messages_in_flight
    }

    pub fn should_resume(&self) -> bool {
        !self.is_paused()
    }

    pub fn has_uncommitted_messages(&self) -> bool {
        self.shared.state.lock().uncommitted
    }

    /// The offset to commit for this partition, or `None` if nothing reached a terminal outcome
    /// since the previous call.
    pub fn commit_offset_and_clear(&self) -> Option<i64> {
        let offset = {
            let mut state = self.shared.state.lock();
            if !state.uncommitted {
                return None;
            }
            state.uncommitted = false;
            state.commit_offset
        };

        if let Some(offset) = offset {
            metrics::gauge!(COMMIT_OFFSET_GAUGE, &self.shared.labels).set(offset as f64);
        }
        offset
    }

    /// No record is handed to a handler after this call. A running handler is left to finish.
    pub fn stop_processing(&self) {
        info!(partition = %self.shared.partition, "Stopping partition processor");
        self.shared.stop();
    }

    /// Stop, then wait up to `timeout` for the running handler to return. On timeout the
    /// processor is reported terminated anyway; a handler that returns later still advances the
    /// commit watermark.
    pub async fn wait_for_handlers_to_terminate(&self, timeout: Duration) {
        self.stop_processing();

        let mut worker_finished = self.worker_finished.clone();
        let finished = tokio::time::timeout(timeout, worker_finished.wait_for(|done| *done))
            .await
            .is_ok();

        let mut state = self.shared.state.lock();
        if finished {
            debug!(partition = %self.shared.partition, "Partition worker finished");
        } else if let Some(in_flight) = state.in_flight {
            warn!(
                partition = %self.shared.partition,
                offset = in_flight.offset,
                attempt = in_flight.attempt,
                retry_pending = in_flight.next_attempt_at.is_some(),
                timeout_ms = timeout.as_millis() as u64,
                "Handler did not finish before the shutdown timeout"
            );
        }
        state.lifecycle = Lifecycle::Terminated;
    }

    pub fn is_terminated(&self) -> bool {
        let state = self.shared.state.lock();
        match state.lifecycle {
            Lifecycle::Running => false,
            Lifecycle::Stopping => state.in_flight.is_none(),
            Lifecycle::Terminated => true,
        }
    }

    /// Set when a record of an unregistered message type halted this partition.
    pub fn configuration_error(&self) -> Option<TypeDictionaryError> {
        self.shared.state.lock().configuration_error.clone()
    }
}

impl Drop for PartitionProcessor {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

enum RecordOutcome {
    /// Handled, given up on, or undecodable. Advances the watermark.
    Consumed,
    /// Left for redelivery after a restart.
    Abandoned,
    Halted(TypeDictionaryError),
}

enum DispatchError {
    Decode(DecodeError),
    Configuration(TypeDictionaryError),
}

impl From<DecodeError> for DispatchError {
    fn from(e: DecodeError) -> Self {
        DispatchError::Decode(e)
    }
}

impl From<TypeDictionaryError> for DispatchError {
    fn from(e: TypeDictionaryError) -> Self {
        DispatchError::Configuration(e)
    }
}

struct Worker {
    shared: Arc<Shared>,
    type_dictionary: Arc<TypeDictionary>,
    failed_message_processor: Arc<dyn FailedMessageProcessor>,
}

impl Worker {
    async fn run(self) {
        info!(partition = %self.shared.partition, "Starting partition worker");

        loop {
            let next = {
                let mut state = self.shared.state.lock();
                if state.lifecycle != Lifecycle::Running {
                    break;
                }
                let next = state.pending.pop_front();
                if let Some(pending) = &next {
                    state.in_flight = Some(InFlightAttempt {
                        offset: pending.record.offset,
                        attempt: 0,
                        next_attempt_at: None,
                    });
                }
                next
            };

            let Some(pending) = next else {
                tokio::select! {
                    _ = self.shared.work_available.notified() => {}
                    _ = self.shared.stopping.cancelled() => {}
                }
                continue;
            };

            let offset = pending.record.offset;
            match self.process(pending).await {
                RecordOutcome::Consumed => self.mark_consumed(offset),
                RecordOutcome::Abandoned => self.clear_in_flight(),
                RecordOutcome::Halted(e) => {
                    error!(
                        partition = %self.shared.partition,
                        offset,
                        error = ?e,
                        "Unregistered message type, halting partition"
                    );
                    {
                        let mut state = self.shared.state.lock();
                        state.configuration_error = Some(e);
                        state.in_flight = None;
                    }
                    self.shared.stop();
                    break;
                }
            }
        }

        let mut state = self.shared.state.lock();
        if state.lifecycle == Lifecycle::Stopping {
            state.lifecycle = Lifecycle::Terminated;
        }
        drop(state);
        info!(partition = %self.shared.partition, "Partition worker stopped");
    }

    fn mark_consumed(&self, offset: i64) {
        let depth = {
            let mut state = self.shared.state.lock();
            let next = offset + 1;
            let watermark = state.commit_offset.map_or(next, |current| current.max(next));
            state.commit_offset = Some(watermark);
            state.uncommitted = true;
            state.in_flight = None;
            state.unprocessed()
        };
        self.shared.record_depth(depth);
        debug!(partition = %self.shared.partition, offset, "Record consumed");
    }

    fn clear_in_flight(&self) {
        let depth = {
            let mut state = self.shared.state.lock();
            state.in_flight = None;
            state.unprocessed()
        };
        self.shared.record_depth(depth);
    }

    fn update_in_flight(&self, attempt: u32, next_attempt_at: Option<Instant>) {
        if let Some(in_flight) = self.shared.state.lock().in_flight.as_mut() {
            in_flight.attempt = attempt;
            in_flight.next_attempt_at = next_attempt_at;
        }
    }

    async fn process(&self, pending: PendingRecord) -> RecordOutcome {
        let PendingRecord {
            record,
            enqueued_at,
        } = pending;
        metrics::histogram!(QUEUE_LATENCY_HISTOGRAM, &self.shared.labels)
            .record(enqueued_at.elapsed().as_secs_f64());

        let (message, handler) = match self.resolve(&record) {
            Ok(resolved) => resolved,
            Err(DispatchError::Configuration(e)) => return RecordOutcome::Halted(e),
            Err(DispatchError::Decode(e)) => {
                error!(
                    partition = %self.shared.partition,
                    offset = record.offset,
                    error = ?e,
                    "Failed to decode record, skipping it"
                );
                let reason = match e {
                    DecodeError::Envelope { .. } => "envelope",
                    DecodeError::MissingMessageType { .. } => "missing_message_type",
                    DecodeError::Payload { .. } => "payload",
                };
                metrics::counter!(PARSE_FAILURES_COUNTER, "reason" => reason).increment(1);
                return RecordOutcome::Consumed;
            }
        };

        let context = message.metadata().new_context();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.update_in_flight(attempt, None);

            let failure = match self.invoke(handler.as_ref(), &message, &context).await {
                Ok(()) => return RecordOutcome::Consumed,
                Err(failure) => failure,
            };

            let delay = match self.dispose(&message, &failure, attempt).await {
                FailureDisposition::Terminal => return RecordOutcome::Consumed,
                FailureDisposition::RetryAfter(delay) => delay,
            };

            debug!(
                message_id = message.metadata().message_id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying message after delay"
            );
            metrics::counter!(HANDLER_RETRIES_COUNTER, &self.shared.labels).increment(1);
            // A delay past the clock's range leaves no deadline to report.
            self.update_in_flight(attempt, Instant::now().checked_add(delay));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shared.stopping.cancelled() => {
                    warn!(
                        partition = %self.shared.partition,
                        offset = record.offset,
                        attempt,
                        "Stopped while waiting to retry, leaving record for redelivery"
                    );
                    return RecordOutcome::Abandoned;
                }
            }
        }
    }

    /// Ask the failure chain what to do next. A panicking chain gives the record up.
    async fn dispose(
        &self,
        message: &Message,
        failure: &anyhow::Error,
        attempt: u32,
    ) -> FailureDisposition {
        let disposition = self
            .failed_message_processor
            .on_failed_message(message, failure, attempt);
        match AssertUnwindSafe(disposition).catch_unwind().await {
            Ok(disposition) => disposition,
            Err(panic) => {
                error!(
                    partition = %self.shared.partition,
                    message_id = message.metadata().message_id(),
                    attempt,
                    reason = %HandlerPanicked::from_panic(panic).reason,
                    "Failed message processor panicked, giving up on message"
                );
                FailureDisposition::Terminal
            }
        }
    }

    fn resolve(
        &self,
        record: &PartitionRecord,
    ) -> Result<(Message, Arc<dyn MessageHandler>), DispatchError> {
        let envelope = Envelope::from_bytes(&record.payload)?;
        if envelope.message_type.is_empty() {
            return Err(DecodeError::MissingMessageType {
                message_id: envelope.message_id,
            }
            .into());
        }

        let message_type = MessageType::new(envelope.message_type.clone());
        let decoder = self.type_dictionary.decoder_for(&message_type)?;
        let handler = self.type_dictionary.handler_for(&message_type)?;
        let payload = decoder.decode(&envelope.inner_message)?;

        Ok((Message::from_record(envelope, payload, record), handler))
    }

    async fn invoke(
        &self,
        handler: &dyn MessageHandler,
        message: &Message,
        context: &RequestContext,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = match AssertUnwindSafe(handler.on_message(message, context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(HandlerPanicked::from_panic(panic).into()),
        };

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::histogram!(
            HANDLER_DURATION_HISTOGRAM,
            "message_type" => message.message_type().name().to_owned()
        )
        .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            HANDLER_ATTEMPTS_COUNTER,
            "message_type" => message.message_type().name().to_owned(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }
}
