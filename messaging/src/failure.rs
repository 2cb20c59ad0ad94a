//! # Failure disposition
//!
//! When a handler fails, the partition processor asks a [`FailedMessageProcessor`] what to do
//! with the message: wait and invoke the handler again, or give up and mark it consumed.
//! Implementations compose as a chain: every non-terminal decision can delegate to a fallback.
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::RpcError;
use crate::message::Message;
use crate::metrics_const::{DEAD_LETTERED_MESSAGES_COUNTER, DISCARDED_MESSAGES_COUNTER};
use crate::retry::RetryDelayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Sleep for the given duration, then invoke the handler again with the same message.
    RetryAfter(Duration),
    /// Stop retrying. The message counts as consumed.
    Terminal,
}

impl FailureDisposition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureDisposition::Terminal)
    }
}

#[async_trait]
pub trait FailedMessageProcessor: Send + Sync {
    /// Decide what happens to `message` after `attempt` handler invocations all failed,
    /// the last one with `failure`.
    async fn on_failed_message(
        &self,
        message: &Message,
        failure: &anyhow::Error,
        attempt: u32,
    ) -> FailureDisposition;
}

/// Gives up immediately. The end of every failure chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardFailedMessages;

#[async_trait]
impl FailedMessageProcessor for DiscardFailedMessages {
    async fn on_failed_message(
        &self,
        message: &Message,
        failure: &anyhow::Error,
        attempt: u32,
    ) -> FailureDisposition {
        let metadata = message.metadata();
        warn!(
            message_id = metadata.message_id(),
            message_type = %metadata.message_type(),
            offset = ?metadata.offset(),
            attempt,
            error = ?failure,
            "Discarding message after failed handling"
        );
        metrics::counter!(
            DISCARDED_MESSAGES_COUNTER,
            "message_type" => metadata.message_type().name().to_owned()
        )
        .increment(1);

        FailureDisposition::Terminal
    }
}

type RecoverablePredicate = dyn Fn(&anyhow::Error) -> bool + Send + Sync;

/// Retries recoverable failures for as long as the delayer allows, then hands over to the
/// fallback. Unrecoverable failures go to the fallback right away.
pub struct DelayAndRetryOnRecoverableErrors {
    fallback: Arc<dyn FailedMessageProcessor>,
    delayer: Arc<dyn RetryDelayer>,
    is_recoverable: Box<RecoverablePredicate>,
}

impl DelayAndRetryOnRecoverableErrors {
    pub fn new(fallback: Arc<dyn FailedMessageProcessor>, delayer: Arc<dyn RetryDelayer>) -> Self {
        Self {
            fallback,
            delayer,
            is_recoverable: Box::new(is_recoverable_by_default),
        }
    }

    /// Replace [`is_recoverable_by_default`] with a custom classification.
    pub fn with_recoverable_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.is_recoverable = Box::new(predicate);
        self
    }
}

#[async_trait]
impl FailedMessageProcessor for DelayAndRetryOnRecoverableErrors {
    async fn on_failed_message(
        &self,
        message: &Message,
        failure: &anyhow::Error,
        attempt: u32,
    ) -> FailureDisposition {
        if (self.is_recoverable)(failure) {
            if let Some(delay) = self.delayer.delay_before_next_attempt(attempt) {
                return FailureDisposition::RetryAfter(delay);
            }
            info!(
                message_id = message.metadata().message_id(),
                attempt, "Retry budget exhausted"
            );
        }

        self.fallback
            .on_failed_message(message, failure, attempt)
            .await
    }
}

/// A failure is recoverable when anything in its chain says it is transient.
pub fn is_recoverable_by_default(failure: &anyhow::Error) -> bool {
    failure.chain().any(|cause| {
        if let Some(rpc_error) = cause.downcast_ref::<RpcError>() {
            return rpc_error.retriable;
        }
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_error.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            );
        }
        cause.is::<tokio::time::error::Elapsed>()
    })
}

/// Somewhere to park messages that could not be handled.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, message: &Message, failure: &anyhow::Error) -> anyhow::Result<()>;
}

/// Publishes failed messages to a [`DeadLetterSink`]. If publishing fails the decision is left
/// to the fallback.
pub struct DeadLetterFailedMessages {
    sink: Arc<dyn DeadLetterSink>,
    fallback: Arc<dyn FailedMessageProcessor>,
}

impl DeadLetterFailedMessages {
    pub fn new(sink: Arc<dyn DeadLetterSink>, fallback: Arc<dyn FailedMessageProcessor>) -> Self {
        Self { sink, fallback }
    }
}

#[async_trait]
impl FailedMessageProcessor for DeadLetterFailedMessages {
    async fn on_failed_message(
        &self,
        message: &Message,
        failure: &anyhow::Error,
        attempt: u32,
    ) -> FailureDisposition {
        match self.sink.publish(message, failure).await {
            Ok(()) => {
                metrics::counter!(
                    DEAD_LETTERED_MESSAGES_COUNTER,
                    "message_type" => message.message_type().name().to_owned()
                )
                .increment(1);
                info!(
                    message_id = message.metadata().message_id(),
                    attempt, "Moved failed message to dead letters"
                );
                FailureDisposition::Terminal
            }
            Err(e) => {
                warn!(
                    message_id = message.metadata().message_id(),
                    error = ?e,
                    "Failed to publish dead letter"
                );
                self.fallback
                    .on_failed_message(message, failure, attempt)
                    .await
            }
        }
    }
}
