//! JSON text codec for siren frames.
//!
//! Inbound frames keep their raw JSON object next to the typed view so that
//! relayed frames go out with every field the client sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::frames::ClientFrame;
use crate::types::Role;

/// Default maximum accepted text frame size (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {limit}")]
    FrameTooLarge {
        /// Received size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Frame is valid JSON but not an object.
    #[error("Frame is not a JSON object")]
    NotAnObject,

    /// JSON syntax or shape error.
    #[error("Decoding error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Enrichment payload did not serialize to an object.
    #[error("Invalid enrichment: {0}")]
    Invalid(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Typed view of the frame.
    pub frame: ClientFrame,
    /// The frame exactly as received.
    pub raw: Map<String, Value>,
}

impl Envelope {
    /// The raw `type` field.
    #[must_use]
    pub fn frame_type(&self) -> &str {
        self.raw.get("type").and_then(Value::as_str).unwrap_or("")
    }

    /// The `userType` field, which any frame may carry.
    #[must_use]
    pub fn user_type(&self) -> Option<Role> {
        self.raw
            .get("userType")
            .and_then(Value::as_str)
            .map(Role::from)
    }

    /// Insert `clientId` unless the client already supplied one.
    pub fn stamp_client_id(&mut self, client_id: &str) {
        self.raw
            .entry("clientId")
            .or_insert_with(|| Value::String(client_id.to_string()));
    }
}

/// Decode a text frame of at most [`DEFAULT_MAX_FRAME_SIZE`] bytes.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, not an object, or
/// lacks a `type` field.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    decode_with_limit(text, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode a text frame of at most `limit` bytes.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, not an object, or
/// lacks a `type` field.
pub fn decode_with_limit(text: &str, limit: usize) -> Result<Envelope, ProtocolError> {
    if text.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            limit,
        });
    }

    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }

    let frame = ClientFrame::deserialize(&value)?;
    let Value::Object(raw) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    Ok(Envelope { frame, raw })
}

/// Encode a frame to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Encode `raw` with the fields of `extra` written on top.
///
/// # Errors
///
/// Returns an error if `extra` does not serialize to a JSON object.
pub fn merge<T: Serialize>(raw: &Map<String, Value>, extra: &T) -> Result<String, ProtocolError> {
    let Value::Object(fields) = serde_json::to_value(extra)? else {
        return Err(ProtocolError::Invalid("expected an object".to_string()));
    };

    let mut merged = raw.clone();
    merged.extend(fields);
    Ok(serde_json::to_string(&merged)?)
}
