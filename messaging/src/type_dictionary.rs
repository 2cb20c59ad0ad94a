//! Static mapping from a wire message type to its payload decoder and its handler.
//!
//! Populated explicitly at startup and shared read-only between all partition processors.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{DecodeError, TypeDictionaryError};
use crate::handler::MessageHandler;
use crate::message::MessagePayload;
use crate::topic::MessageType;

pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn MessagePayload>, DecodeError>;
}

/// Decodes protobuf payloads of type `T`.
pub struct ProtoDecoder<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> ProtoDecoder<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for ProtoDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadDecoder for ProtoDecoder<T>
where
    T: prost::Message + prost::Name + Default + 'static,
{
    fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn MessagePayload>, DecodeError> {
        let payload = T::decode(bytes).map_err(|source| DecodeError::Payload {
            message_type: MessageType::of::<T>(),
            source,
        })?;
        Ok(Arc::new(payload))
    }
}

#[derive(Default, Clone)]
pub struct TypeDictionary {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
    decoders: HashMap<MessageType, Arc<dyn PayloadDecoder>>,
}

impl TypeDictionary {
    pub fn new(
        handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
        decoders: HashMap<MessageType, Arc<dyn PayloadDecoder>>,
    ) -> Self {
        Self { handlers, decoders }
    }

    /// Register `handler` for protobuf payloads of type `T`, together with the matching decoder.
    pub fn register<T, H>(&mut self, handler: H) -> &mut Self
    where
        T: prost::Message + prost::Name + Default + 'static,
        H: MessageHandler + 'static,
    {
        let message_type = MessageType::of::<T>();
        self.decoders
            .insert(message_type.clone(), Arc::new(ProtoDecoder::<T>::new()));
        self.handlers.insert(message_type, Arc::new(handler));
        self
    }

    pub fn put_handler(
        &mut self,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> &mut Self {
        self.handlers.insert(message_type, handler);
        self
    }

    pub fn put_decoder(
        &mut self,
        message_type: MessageType,
        decoder: Arc<dyn PayloadDecoder>,
    ) -> &mut Self {
        self.decoders.insert(message_type, decoder);
        self
    }

    pub fn handler_for(
        &self,
        message_type: &MessageType,
    ) -> Result<Arc<dyn MessageHandler>, TypeDictionaryError> {
        self.handlers
            .get(message_type)
            .cloned()
            .ok_or_else(|| TypeDictionaryError::UnknownHandler(message_type.clone()))
    }

    pub fn decoder_for(
        &self,
        message_type: &MessageType,
    ) -> Result<Arc<dyn PayloadDecoder>, TypeDictionaryError> {
        self.decoders
            .get(message_type)
            .cloned()
            .ok_or_else(|| TypeDictionaryError::UnknownDecoder(message_type.clone()))
    }

    /// Startup check: every handled type can be decoded and every decodable type is handled.
    pub fn validate(&self) -> Result<(), TypeDictionaryError> {
        if let Some(message_type) = self
            .handlers
            .keys()
            .find(|message_type| !self.decoders.contains_key(*message_type))
        {
            return Err(TypeDictionaryError::UnknownDecoder(message_type.clone()));
        }
        if let Some(message_type) = self
            .decoders
            .keys()
            .find(|message_type| !self.handlers.contains_key(*message_type))
        {
            return Err(TypeDictionaryError::UnknownHandler(message_type.clone()));
        }
        Ok(())
    }

    pub fn message_types(&self) -> impl Iterator<Item = &MessageType> {
        self.handlers.keys()
    }
}
