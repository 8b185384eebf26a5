//! Response decoding.

use bytes::Bytes;
use derive_more::Display;

use crate::{Error, Result};

/// How a transport should decode the response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum ResponseType {
    /// Parse as JSON (an empty payload decodes to [`Body::Empty`]).
    #[default]
    #[display("json")]
    Json,
    /// Decode as UTF-8 text.
    #[display("text")]
    Text,
    /// Keep the raw bytes.
    #[display("bytes")]
    Bytes,
}

impl ResponseType {
    /// Value for the `Accept` header.
    #[must_use]
    pub const fn accept(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain, */*",
            Self::Bytes => "*/*",
        }
    }
}

/// A decoded response payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No payload.
    #[default]
    Empty,
    /// Raw bytes.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// Parsed JSON.
    Json(serde_json::Value),
}

impl Body {
    /// Decode raw bytes according to `response_type`.
    ///
    /// # Errors
    ///
    /// Returns a decode error for invalid UTF-8 or malformed JSON.
    pub fn decode(bytes: Bytes, response_type: ResponseType) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::Empty);
        }
        match response_type {
            ResponseType::Bytes => Ok(Self::Bytes(bytes)),
            ResponseType::Text => String::from_utf8(bytes.to_vec())
                .map(Self::Text)
                .map_err(|e| Error::decode(format!("invalid UTF-8 body: {e}")).with_source(e)),
            ResponseType::Json => from_json(&bytes).map(Self::Json),
        }
    }

    /// Returns `true` for [`Body::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Text view of the payload, when it is text or valid UTF-8 bytes.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            Self::Empty | Self::Json(_) => None,
        }
    }

    /// Deserialize the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the payload does not match `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Json(value) => serde_path_to_error::deserialize(value).map_err(|e| {
                Error::decode(format!(
                    "JSON deserialization error at '{}': {}",
                    e.path(),
                    e.inner()
                ))
            }),
            Self::Text(text) => from_json(text.as_bytes()),
            Self::Bytes(bytes) => from_json(bytes),
            Self::Empty => from_json(b"null"),
        }
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

/// Serialize a value to JSON bytes.
///
/// # Errors
///
/// Returns an unknown-kind error if serialization fails.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::unknown(format!("JSON serialization error: {e}")).with_source(e))
}

/// Deserialize JSON bytes with path-aware error messages.
///
/// # Errors
///
/// Returns a decode error naming the path of the offending field.
///
/// ```
/// use conduit_core::from_json;
/// use serde::Deserialize;
///
/// #[derive(Debug, PartialEq, Deserialize)]
/// struct User { name: String }
///
/// let user: User = from_json(br#"{"name":"Alice"}"#).expect("deserialize");
/// assert_eq!(user, User { name: "Alice".to_string() });
/// ```
pub fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        Error::decode(format!(
            "JSON deserialization error at '{}': {}",
            e.path(),
            e.inner()
        ))
    })
}
