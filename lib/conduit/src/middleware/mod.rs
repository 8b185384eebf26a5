//! Built-in middleware for the conduit client.
//!
//! Every middleware implements [`Middleware<Context>`](conduit_core::Middleware)
//! and runs in registration order: the first registered sees the request
//! first and the response last.
//!
//! - [`Logging`] - logs requests and outcomes with `tracing`
//! - [`BearerAuth`] - adds `Authorization: Bearer <token>`
//! - [`Cache`] - serves repeated GET requests from memory
//! - [`RateLimit`] - token-bucket limit via `governor` (feature `middleware-rate-limit`)
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use conduit::Client;
//!
//! let client = Client::builder()
//!     .with_logging()
//!     .with_bearer_auth("my-token")
//!     .with_cache(Duration::from_secs(30))
//!     .build();
//! ```

mod bearer_auth;
mod cache;
mod logging;
#[cfg(feature = "middleware-rate-limit")]
mod rate_limit;

pub use bearer_auth::BearerAuth;
pub use cache::Cache;
pub use logging::{LogLevel, Logging};
#[cfg(feature = "middleware-rate-limit")]
pub use rate_limit::RateLimit;

pub use conduit_core::{from_fn, Middleware, Next};
