//! Record codec.
//!
//! The record is the only payload that crosses the bridge: it arrives as the
//! body of `POST /`, travels over the broker channel as UTF-8 JSON, and is
//! decoded again by the relay loop.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

/// Errors produced while encoding or decoding a record.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed record payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Record payload must be a JSON object")]
    NotAnObject,

    #[error("Record field '{0}' must be a string")]
    FieldType(&'static str),

    #[error("Failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A user record exchanged between ingress and relay.
///
/// Both fields are optional on the wire: absent or `null` fields decode to
/// an empty string, unknown fields are ignored, and field names match
/// without regard to ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Record {
    pub name: String,
    pub email: String,
}

impl Record {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Decode a record from a JSON payload.
    ///
    /// Every call produces a fresh record, so a partial payload never
    /// inherits fields from a previously decoded one.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_slice(payload).map_err(CodecError::Decode)?;
        let Value::Object(fields) = value else {
            return Err(CodecError::NotAnObject);
        };

        Ok(Self {
            name: string_field(&fields, "name")?,
            email: string_field(&fields, "email")?,
        })
    }

    /// Encode the record into its wire payload.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }
}

/// Look up `key`, preferring an exact match over a case-insensitive one.
fn string_field(fields: &Map<String, Value>, key: &'static str) -> Result<String, CodecError> {
    let value = fields.get(key).or_else(|| {
        fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    });

    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(CodecError::FieldType(key)),
    }
}
