//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::fmt;

use bytes::Bytes;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;

use crate::CodecError;

/// Decoded message payload.
///
/// Bytes that parse as JSON become [`Payload::Structured`]; anything else is
/// handed back verbatim as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Payload that parsed as a JSON document.
    Structured(Value),
    /// Payload that is not JSON, kept as raw text.
    Text(String),
}

impl Payload {
    /// Whether the payload carries something worth handing to a data handler.
    ///
    /// Empty text, `null`, `false` and numeric zero are considered empty.
    pub fn is_usable(&self) -> bool {
        match self {
            Payload::Text(text) => !text.is_empty(),
            Payload::Structured(Value::Null) => false,
            Payload::Structured(Value::Bool(flag)) => *flag,
            Payload::Structured(Value::Number(number)) => number.as_f64() != Some(0.0),
            Payload::Structured(Value::String(text)) => !text.is_empty(),
            Payload::Structured(_) => true,
        }
    }

    /// Borrow the raw text when the payload was not JSON.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Structured(_) => None,
        }
    }

    /// Borrow the JSON document when the payload parsed.
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Payload::Structured(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// Convert into a JSON value, wrapping raw text as a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            Payload::Structured(value) => value,
            Payload::Text(text) => Value::String(text),
        }
    }

    /// Deserialize the payload into a caller type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        let value = match self {
            Payload::Structured(value) => value.clone(),
            Payload::Text(text) => Value::String(text.clone()),
        };
        Ok(serde_json::from_value(value)?)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Structured(value) => write!(f, "{value}"),
            Payload::Text(text) => f.write_str(text),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// Encode a value for the wire.
///
/// Strings are written as their raw UTF-8 bytes without JSON quoting. Every
/// other value is serialized as JSON.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, CodecError> {
    match serde_json::to_value(value)? {
        Value::String(text) => Ok(Bytes::from(text)),
        other => Ok(Bytes::from(serde_json::to_vec(&other)?)),
    }
}

/// Decode wire bytes, preferring JSON and falling back to raw text.
pub fn decode(bytes: &[u8]) -> Payload {
    let text = String::from_utf8_lossy(bytes);
    if is_structured(&text) {
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            return Payload::Structured(value);
        }
    }
    Payload::Text(text.into_owned())
}

/// Whether the text is a complete JSON document.
pub fn is_structured(text: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(text).is_ok()
}
