//! Error taxonomy.
//!
//! Every failure that leaves the pipeline is an [`Error`] of exactly one
//! [`ErrorKind`]. Raw failures coming out of a transport are mapped through
//! [`Error::normalize`].

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::SystemTime;

use derive_more::Display;

use crate::{AbortError, AbortReason, Body, Request, Response};

/// Failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// The connection could not be established or broke mid-flight.
    #[display("network")]
    Network,
    /// The request did not complete in time.
    #[display("timeout")]
    Timeout,
    /// The server answered with a 4xx or 5xx status.
    #[display("http")]
    Http,
    /// The caller aborted the request.
    #[display("aborted")]
    Aborted,
    /// The response body could not be decoded.
    #[display("decode")]
    Decode,
    /// Anything else.
    #[display("unknown")]
    Unknown,
}

/// Main error type for conduit operations.
#[derive(Debug, Clone, Display)]
#[display("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    status_text: Option<String>,
    request: Option<Arc<Request>>,
    response: Option<Arc<Response<Body>>>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
    timestamp: SystemTime,
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

impl Error {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            status_text: None,
            request: None,
            response: None,
            source: None,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create an HTTP status error.
    #[must_use]
    pub fn http(status: u16, status_text: impl Into<String>) -> Self {
        let status_text = status_text.into();
        let mut error = Self::new(
            ErrorKind::Http,
            format!("HTTP error {status}: {status_text}"),
        );
        error.status = Some(status);
        error.status_text = Some(status_text);
        error
    }

    /// Create an aborted error.
    #[must_use]
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    /// Create a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    /// Create an unknown error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Map any raw failure to exactly one kind.
    ///
    /// Checked in order: an already-typed [`Error`] is returned as is; an
    /// [`AbortError`] becomes aborted (or timeout when the latch fired on a
    /// timeout); a tokio `Elapsed`, an io `TimedOut` or a message mentioning
    /// "timeout"/"timed out" becomes timeout; a message mentioning "abort"
    /// becomes aborted; any other io error or a message mentioning
    /// "network"/"connection" becomes network; the rest is unknown.
    #[must_use]
    pub fn normalize(raw: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        let raw = match raw.into().downcast::<Self>() {
            Ok(error) => return *error,
            Err(raw) => raw,
        };
        let raw = match raw.downcast::<AbortError>() {
            Ok(abort) => {
                let mut error = abort.reason().into_error();
                error.source = Some(Arc::new(*abort));
                return error;
            }
            Err(raw) => raw,
        };

        let message = raw.to_string();
        let lower = message.to_lowercase();
        let io_kind = raw.downcast_ref::<std::io::Error>().map(std::io::Error::kind);
        let elapsed = raw.is::<tokio::time::error::Elapsed>();

        let kind = if elapsed
            || io_kind == Some(std::io::ErrorKind::TimedOut)
            || lower.contains("timeout")
            || lower.contains("timed out")
        {
            ErrorKind::Timeout
        } else if lower.contains("abort") {
            ErrorKind::Aborted
        } else if io_kind.is_some() || lower.contains("network") || lower.contains("connection") {
            ErrorKind::Network
        } else {
            ErrorKind::Unknown
        };

        let mut error = Self::new(kind, message);
        error.source = Some(Arc::from(raw));
        error
    }

    /// Attach the originating request.
    #[must_use]
    pub fn with_request(mut self, request: impl Into<Arc<Request>>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// Attach the originating request unless one is already attached.
    #[must_use]
    pub fn or_request(self, request: &Arc<Request>) -> Self {
        if self.request.is_some() {
            self
        } else {
            self.with_request(Arc::clone(request))
        }
    }

    /// Attach the (partial) response.
    #[must_use]
    pub fn with_response(mut self, response: Response<Body>) -> Self {
        if self.status.is_none() {
            self.status = Some(response.status());
            self.status_text = Some(response.status_text().to_string());
        }
        self.response = Some(Arc::new(response));
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// The failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status code, if one was obtained.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// HTTP status text, if one was obtained.
    #[must_use]
    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    /// The originating request.
    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    /// The partial response, if one was obtained.
    #[must_use]
    pub fn response(&self) -> Option<&Response<Body>> {
        self.response.as_deref()
    }

    /// When this error was created.
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Returns `true` for network errors.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self.kind, ErrorKind::Network)
    }

    /// Returns `true` for timeout errors.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns `true` for HTTP status errors.
    #[must_use]
    pub const fn is_http(&self) -> bool {
        matches!(self.kind, ErrorKind::Http)
    }

    /// Returns `true` if the caller aborted the request.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted)
    }

    /// Returns `true` for decode errors.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self.kind, ErrorKind::Decode)
    }

    /// Returns `true` if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.is_http() && self.status.is_some_and(|s| (400..500).contains(&s))
    }

    /// Returns `true` if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.is_http() && self.status.is_some_and(|s| s >= 500)
    }

    /// Network and timeout errors are retryable, HTTP errors only from 500 up.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Network | ErrorKind::Timeout => true,
            ErrorKind::Http => self.status.is_some_and(|s| s >= 500),
            ErrorKind::Aborted | ErrorKind::Decode | ErrorKind::Unknown => false,
        }
    }

    /// Try to decode the partial response body as JSON.
    ///
    /// Returns `None` if no response was attached.
    ///
    /// ```ignore
    /// #[derive(Debug, Deserialize)]
    /// struct ApiError {
    ///     code: String,
    /// }
    ///
    /// if let Err(e) = client.get("/users/42").await {
    ///     if let Some(Ok(api_error)) = e.decode_body::<ApiError>() {
    ///         tracing::warn!(code = %api_error.code, "API rejected request");
    ///     }
    /// }
    /// ```
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T>> {
        self.response.as_deref().map(|response| response.body().json())
    }
}

impl From<AbortReason> for Error {
    fn from(reason: AbortReason) -> Self {
        reason.into_error()
    }
}
