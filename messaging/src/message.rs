//! Domain form of a message: a typed payload plus its routing and correlation metadata.
//!
//! Inbound messages are built by decoding an [`Envelope`]; outbound messages are built with
//! [`Message::request_for`], [`Message::reply_to`] or [`Message::one_way`] and turned into an
//! envelope with [`Message::to_envelope`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::context::RequestContext;
use crate::envelope::Envelope;
use crate::error::MessageError;
use crate::topic::{MessageType, Topic};
use crate::types::PartitionRecord;

/// A decoded payload whose concrete type is only known to the handler.
pub trait MessagePayload: Any + Send + Sync + fmt::Debug {
    fn encode_payload(&self) -> Vec<u8>;

    fn as_any(&self) -> &dyn Any;
}

impl<T> MessagePayload for T
where
    T: prost::Message + 'static,
{
    fn encode_payload(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    was_received: bool,
    topic: Topic,
    partitioning_key: String,
    partition: Option<i32>,
    offset: Option<i64>,
    message_id: String,
    correlation_id: String,
    request_correlation_id: String,
    reply_to: Option<Topic>,
    message_type: MessageType,
}

impl Metadata {
    /// True for messages decoded from a broker record, false for messages built locally.
    pub fn was_received(&self) -> bool {
        self.was_received
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn partitioning_key(&self) -> &str {
        &self.partitioning_key
    }

    pub fn partition(&self) -> Option<i32> {
        self.partition
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// On a reply: the message id of the request it answers. Empty otherwise.
    pub fn request_correlation_id(&self) -> &str {
        &self.request_correlation_id
    }

    pub fn reply_to(&self) -> Option<&Topic> {
        self.reply_to.as_ref()
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    /// The context a handler runs in: it continues the correlation chain of this message.
    pub fn new_context(&self) -> RequestContext {
        RequestContext::with_correlation_id(self.correlation_id.clone())
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    payload: Arc<dyn MessagePayload>,
    metadata: Metadata,
}

impl Message {
    /// A request to `target` that expects a reply on `reply_to`.
    pub fn request_for<T>(
        target: Topic,
        reply_to: Topic,
        partitioning_key: impl Into<String>,
        payload: T,
        context: &RequestContext,
    ) -> Self
    where
        T: prost::Message + prost::Name + 'static,
    {
        Self::outbound(
            target,
            partitioning_key.into(),
            String::new(),
            Some(reply_to),
            payload,
            context,
        )
    }

    /// A reply to `original_request`, routed with the request's partitioning key.
    pub fn reply_to<T>(
        original_request: &Message,
        payload: T,
        context: &RequestContext,
    ) -> Result<Self, MessageError>
    where
        T: prost::Message + prost::Name + 'static,
    {
        let partitioning_key = original_request.metadata.partitioning_key.clone();
        Self::reply_to_with_key(original_request, payload, partitioning_key, context)
    }

    pub fn reply_to_with_key<T>(
        original_request: &Message,
        payload: T,
        partitioning_key: impl Into<String>,
        context: &RequestContext,
    ) -> Result<Self, MessageError>
    where
        T: prost::Message + prost::Name + 'static,
    {
        let request = &original_request.metadata;
        let target = request.reply_to.clone().ok_or_else(|| MessageError::NoReplyTo {
            message_id: request.message_id.clone(),
        })?;

        Ok(Self::outbound(
            target,
            partitioning_key.into(),
            request.message_id.clone(),
            None,
            payload,
            context,
        ))
    }

    /// A fire-and-forget message.
    pub fn one_way<T>(
        target: Topic,
        partitioning_key: impl Into<String>,
        payload: T,
        context: &RequestContext,
    ) -> Self
    where
        T: prost::Message + prost::Name + 'static,
    {
        Self::outbound(
            target,
            partitioning_key.into(),
            String::new(),
            None,
            payload,
            context,
        )
    }

    fn outbound<T>(
        target: Topic,
        partitioning_key: String,
        request_correlation_id: String,
        reply_to: Option<Topic>,
        payload: T,
        context: &RequestContext,
    ) -> Self
    where
        T: prost::Message + prost::Name + 'static,
    {
        let metadata = Metadata {
            was_received: false,
            topic: target,
            partitioning_key,
            partition: None,
            offset: None,
            message_id: Uuid::new_v4().to_string(),
            correlation_id: context.correlation_id().to_owned(),
            request_correlation_id,
            reply_to,
            message_type: MessageType::of::<T>(),
        };

        Self {
            payload: Arc::new(payload),
            metadata,
        }
    }

    /// Rebuild an inbound message from its envelope, its decoded payload and the record it came in.
    pub fn from_record(
        envelope: Envelope,
        payload: Arc<dyn MessagePayload>,
        record: &PartitionRecord,
    ) -> Self {
        let reply_to = if envelope.reply_to.is_empty() {
            None
        } else {
            Some(Topic::new(envelope.reply_to))
        };
        let partitioning_key = match &record.key {
            Some(key) => key.clone(),
            None => envelope.partitioning_key,
        };

        let metadata = Metadata {
            was_received: true,
            topic: Topic::new(record.topic.clone()),
            partitioning_key,
            partition: Some(record.partition),
            offset: Some(record.offset),
            message_id: envelope.message_id,
            correlation_id: envelope.correlation_id,
            request_correlation_id: envelope.request_correlation_id,
            reply_to,
            message_type: MessageType::new(envelope.message_type),
        };

        Self { payload, metadata }
    }

    pub fn to_envelope(&self) -> Envelope {
        let metadata = &self.metadata;
        Envelope {
            message_id: metadata.message_id.clone(),
            message_type: metadata.message_type.name().to_owned(),
            inner_message: self.payload.encode_payload(),
            correlation_id: metadata.correlation_id.clone(),
            request_correlation_id: metadata.request_correlation_id.clone(),
            reply_to: metadata
                .reply_to
                .as_ref()
                .map(|topic| topic.name().to_owned())
                .unwrap_or_default(),
            partitioning_key: metadata.partitioning_key.clone(),
            topic: metadata.topic.name().to_owned(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn message_type(&self) -> &MessageType {
        &self.metadata.message_type
    }

    pub fn payload(&self) -> &dyn MessagePayload {
        self.payload.as_ref()
    }

    /// The payload as its concrete type, if it is a `T`.
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }
}
