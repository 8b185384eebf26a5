//! Prelude module for convenient imports.
//!
//! ```ignore
//! use conduit::prelude::*;
//! ```

pub use crate::{
    AbortController, AbortSignal, Client, ClientConfig, Context, Error, ErrorKind, Message,
    Method, Middleware, Next, Request, Response, ResponseType, Result, RetryPolicy, StatusCode,
    StreamSession, from_fn, header,
};
pub use conduit_core::BoxFuture;
pub use futures_util::StreamExt;
pub use serde::{Deserialize, Serialize};
