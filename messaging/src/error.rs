use std::fmt;

use thiserror::Error;

use crate::topic::MessageType;

/// A record that can never be turned into a `Message`, no matter how often it is retried.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to decode envelope")]
    Envelope { source: prost::DecodeError },
    #[error("envelope {message_id:?} carries no message type")]
    MissingMessageType { message_id: String },
    #[error("failed to decode payload of type {message_type}")]
    Payload {
        message_type: MessageType,
        source: prost::DecodeError,
    },
}

/// Configuration defects: the type registry was not set up for a message type.
/// These are never retried and never swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeDictionaryError {
    #[error("no payload decoder registered for message type {0}")]
    UnknownDecoder(MessageType),
    #[error("no message handler registered for message type {0}")]
    UnknownHandler(MessageType),
}

/// Invalid construction of an outbound message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("request {message_id} has no reply-to topic")]
    NoReplyTo { message_id: String },
}

/// Broad classification of a handler failure, mirroring the RPC error categories of the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    BadRequest,
    Unauthorized,
    InsufficientPermissions,
    ResourceNotFound,
    Conflict,
    InternalServerError,
    BackendError,
    RequestTimedOut,
}

impl ErrorCategory {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::BadRequest => 400,
            ErrorCategory::Unauthorized => 401,
            ErrorCategory::InsufficientPermissions => 403,
            ErrorCategory::ResourceNotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::InternalServerError => 500,
            ErrorCategory::BackendError => 501,
            ErrorCategory::RequestTimedOut => 504,
        }
    }
}

/// A categorised handler failure. `retriable` is consulted by the default
/// recoverability check of the retry disposition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{category:?} ({code}): {message}")]
pub struct RpcError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

impl RpcError {
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retriable: false,
        }
    }

    pub fn retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }
}

/// Raised in place of a handler that panicked.
/// Use anyhow's downcast_ref::<HandlerPanicked>() to detect this error type.
#[derive(Debug)]
pub struct HandlerPanicked {
    pub reason: String,
}

impl HandlerPanicked {
    pub(crate) fn from_panic(panic: Box<dyn std::any::Any + Send>) -> Self {
        let reason = if let Some(reason) = panic.downcast_ref::<&str>() {
            (*reason).to_string()
        } else if let Some(reason) = panic.downcast_ref::<String>() {
            reason.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { reason }
    }
}

impl fmt::Display for HandlerPanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler panicked: {}", self.reason)
    }
}

impl std::error::Error for HandlerPanicked {}
