//! Response types.
//!
//! [`Response`] is the decoded result a transport hands back; [`StreamHead`]
//! is what a streaming session exposes once its connection is open.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Body, Request};

/// Response with status, headers, decoded body and the originating request.
#[derive(Debug, Clone)]
pub struct Response<B = Body> {
    status: u16,
    status_text: String,
    headers: HashMap<String, String>,
    body: B,
    request: Arc<Request>,
}

impl<B> Response<B> {
    /// Creates a new response.
    #[must_use]
    pub fn new(
        status: u16,
        status_text: impl Into<String>,
        headers: HashMap<String, String>,
        body: B,
        request: Arc<Request>,
    ) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers,
            body,
            request,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// HTTP status text.
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Response headers (lower-case names).
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Single header value by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Response body.
    #[must_use]
    pub const fn body(&self) -> &B {
        &self.body
    }

    /// The request that produced this response.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Shared handle to the originating request.
    #[must_use]
    pub fn request_arc(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    /// Status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Consume into the body.
    #[must_use]
    pub fn into_body(self) -> B {
        self.body
    }

    /// Map the body to a different type.
    #[must_use]
    pub fn map_body<F, T>(self, f: F) -> Response<T>
    where
        F: FnOnce(B) -> T,
    {
        Response {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body: f(self.body),
            request: self.request,
        }
    }
}

impl Response<Body> {
    /// Deserialize the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the body does not match `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        self.body.json()
    }

    /// Text view of the body.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.body.as_text()
    }
}

/// Status line and headers of an opened stream.
#[derive(Debug, Clone)]
pub struct StreamHead {
    /// HTTP status code.
    pub status: u16,
    /// HTTP status text.
    pub status_text: String,
    /// Response headers (lower-case names).
    pub headers: HashMap<String, String>,
    /// The request that opened the stream.
    pub request: Arc<Request>,
}

impl StreamHead {
    /// Status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Single header value by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}
