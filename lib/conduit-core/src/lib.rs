//! Core types and traits for the conduit request pipeline.
//!
//! This crate is transport-agnostic:
//! - [`pipeline`] - onion-model middleware dispatch ([`Pipeline`], [`Middleware`], [`Next`])
//! - [`Error`] and [`ErrorKind`] - the failure taxonomy, with [`Error::normalize`]
//! - [`transport`] - the [`Transport`] trait and its terminal handler
//! - [`retry`] - the [`Retry`] transport decorator and its [`RetryPolicy`]
//! - [`stream`] - the push-to-pull streaming bridge ([`StreamSession`], [`EventSource`])
//! - [`AbortController`] / [`AbortSignal`] - the single-fire cancellation latch
//! - [`Request`], [`Response`], [`Context`] - what flows through a dispatch

mod abort;
mod body;
mod context;
mod error;
mod method;
pub mod pipeline;
pub mod prelude;
mod request;
mod response;
pub mod retry;
pub mod stream;
pub mod transport;

pub use abort::{AbortController, AbortError, AbortReason, AbortSignal};
pub use body::{Body, ResponseType, from_json, to_json};
pub use context::Context;
pub use error::{Error, ErrorKind, Result};
pub use method::Method;
pub use pipeline::{BoxFuture, Handler, Middleware, Next, Pipeline, from_fn, handler_fn};
pub use request::{Request, RequestBuilder, RequestDefaults};
pub use response::{Response, StreamHead};
pub use retry::{Backoff, Retry, RetryLayer, RetryPolicy};
pub use stream::{
    Connecting, EventSink, EventSource, Message, MessageStream, StreamConnector, StreamSession,
};
pub use transport::{Transport, TransportHandler, transport_fn};

// Re-export http crate types for status codes and headers
pub use http::{StatusCode, header};
