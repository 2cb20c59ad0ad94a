//! Partition processing engine for services consuming partitioned, ordered message streams.
//!
//! Records fetched by an ingestion layer are handed to a [`PartitionProcessor`], which decodes
//! them through the [`TypeDictionary`], dispatches them one at a time to the registered
//! [`MessageHandler`], consults a [`FailedMessageProcessor`] chain when a handler fails, and
//! tracks the offset that is safe to commit back to the broker.
//!
//! ## Error logging (anyhow)
//!
//! Handler failures are `anyhow::Error`. Log them as a structured field, `error = ?e`, so the
//! whole `Caused by:` chain is visible. Build them with `.context()` so classification via
//! `downcast_ref` can still reach the root cause.

pub mod context;
pub mod envelope;
pub mod error;
pub mod failure;
pub mod handler;
pub mod interceptors;
pub mod message;
pub mod metrics_const;
pub mod processor;
pub mod retry;
pub mod topic;
pub mod type_dictionary;
pub mod types;

pub use context::RequestContext;
pub use envelope::Envelope;
pub use error::{DecodeError, ErrorCategory, MessageError, RpcError, TypeDictionaryError};
pub use failure::{
    DeadLetterFailedMessages, DeadLetterSink, DelayAndRetryOnRecoverableErrors,
    DiscardFailedMessages, FailedMessageProcessor, FailureDisposition,
};
pub use handler::MessageHandler;
pub use interceptors::HandlerExt;
pub use message::{Message, MessagePayload, Metadata};
pub use processor::{PartitionProcessor, ProcessorConfig};
pub use retry::{BackoffRetryDelayer, RetryDelayer, SimpleRetryDelayer};
pub use topic::{MessageType, Topic};
pub use type_dictionary::{PayloadDecoder, ProtoDecoder, TypeDictionary};
pub use types::{Partition, PartitionRecord};
