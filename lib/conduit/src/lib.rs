//! HTTP client with an onion-model middleware pipeline.
//!
//! Cross-cutting behavior (logging, auth, caching, rate limiting) is written
//! once as [`Middleware`] and attached to a [`Client`]; retries wrap the
//! transport; Server-Sent-Events responses are consumed as a cancellable
//! [`MessageStream`].
//!
//! # Example
//!
//! ```ignore
//! use conduit::prelude::*;
//! use std::time::Duration;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! let client = Client::builder()
//!     .base_url("https://api.example.com".parse()?)
//!     .with_logging()
//!     .with_retry(RetryPolicy::new(3))
//!     .build();
//!
//! let user: User = client.get("/users/42").await?.json()?;
//!
//! let (head, session) = client.stream(Request::get("/events").build())?.await?;
//! let mut messages = session.stream();
//! while let Some(message) = messages.next().await {
//!     println!("{}", message?.data);
//! }
//! ```

mod client;
mod config;
mod connector;
pub mod middleware;
pub mod prelude;
pub mod sse;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use connector::https_connector;
pub use sse::SseSource;
pub use transport::{HyperTransport, StreamingResponse};

// Re-export core types
pub use conduit_core::{
    AbortController, AbortReason, AbortSignal, Backoff, Body, Connecting, Context, Error,
    ErrorKind, EventSink, EventSource, Message, MessageStream, Method, Middleware, Next, Pipeline,
    Request, RequestBuilder, RequestDefaults, Response, ResponseType, Result, Retry, RetryLayer,
    RetryPolicy, StreamHead, StreamSession, Transport, from_fn, from_json, to_json,
};

// Re-export http types for status codes and headers
pub use conduit_core::{StatusCode, header};

pub use url;
