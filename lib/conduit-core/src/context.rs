//! Per-call dispatch context.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Body, Error, Request, Response};

/// Mutable record threaded through one dispatch.
///
/// A context belongs to exactly one dispatch and is never shared between
/// requests. `response` and `error` may both be set: a middleware can inspect
/// a caught failure before deciding whether to propagate it.
#[derive(Debug, Clone)]
pub struct Context<T = Body> {
    /// The request being executed, with defaults already merged.
    pub request: Request,
    /// The response, once the terminal handler (or a middleware) produced one.
    pub response: Option<Response<T>>,
    /// The failure recorded by the terminal handler.
    pub error: Option<Error>,
    /// Free-form values shared between middleware.
    pub state: HashMap<String, serde_json::Value>,
}

impl<T> Context<T> {
    /// Create a fresh context for `request`.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
            error: None,
            state: HashMap::new(),
        }
    }

    /// Store a value in the shared state.
    ///
    /// # Errors
    ///
    /// Returns an unknown-kind error if the value cannot be serialized.
    pub fn insert_state(&mut self, key: impl Into<String>, value: &impl Serialize) -> crate::Result<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            Error::unknown(format!("cannot store context state: {e}")).with_source(e)
        })?;
        self.state.insert(key.into(), value);
        Ok(())
    }

    /// Read a value from the shared state.
    ///
    /// Returns `None` if the key is missing or the value has another shape.
    #[must_use]
    pub fn state<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.state
            .get(key)
            .and_then(|value| V::deserialize(value).ok())
    }

    /// Take the response out, leaving `None`.
    pub fn take_response(&mut self) -> Option<Response<T>> {
        self.response.take()
    }
}
