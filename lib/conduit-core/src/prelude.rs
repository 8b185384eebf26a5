//! Prelude module for convenient imports.
//!
//! ```ignore
//! use conduit_core::prelude::*;
//! ```

pub use crate::pipeline::BoxFuture;
pub use crate::{
    AbortController, AbortReason, AbortSignal, Body, Context, Error, ErrorKind, EventSink,
    EventSource, Handler, Message, Method, Middleware, Next, Pipeline, Request, RequestBuilder,
    Response, ResponseType, Result, Retry, RetryPolicy, StreamSession, Transport,
};
