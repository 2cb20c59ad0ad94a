//! Wire form of a message: routing metadata plus the opaque encoded payload.

use prost::Message as _;

use crate::error::DecodeError;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub message_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub inner_message: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "4")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub request_correlation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub reply_to: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub partitioning_key: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub topic: ::prost::alloc::string::String,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(bytes).map_err(|source| DecodeError::Envelope { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_survives_the_wire() {
        let envelope = Envelope {
            message_id: "4f7b".to_string(),
            message_type: "orders.OrderPlaced".to_string(),
            inner_message: vec![8, 1],
            correlation_id: "corr".to_string(),
            request_correlation_id: "req".to_string(),
            reply_to: "inbox-com.example.billing".to_string(),
            partitioning_key: "customer-7".to_string(),
            topic: "inbox-com.example.orders".to_string(),
        };

        let decoded = Envelope::from_bytes(&envelope.to_bytes()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let result = Envelope::from_bytes(&[0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(DecodeError::Envelope { .. })));
    }
}
