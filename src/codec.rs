// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Payload codecs. The publisher and the consumer are generic over a
//! [`Codec`] so the envelope handling never depends on the wire format.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Serialize};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub trait Codec: Send + Sync + 'static {
    /// MIME type advertised in the message properties.
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, AmqpError>;
}

/// Compact UTF-8 JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|err| AmqpError::SerializePayloadError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, AmqpError> {
        serde_json::from_slice(bytes).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
    }
}
