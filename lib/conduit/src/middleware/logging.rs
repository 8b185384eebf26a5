//! Request/response logging middleware.
//!
//! Logs each dispatch with the `tracing` crate, inside an `http_request` span.

use std::time::Instant;

use conduit_core::{BoxFuture, Context, Middleware, Next, Result};
use tracing::{Instrument, Level, debug, info, span, warn};

/// Log level for the logging middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Log at debug level (request/response details).
    Debug,
    /// Log at info level (summary only).
    #[default]
    Info,
}

/// Middleware that logs requests, their outcome and elapsed time.
///
/// # Example
///
/// ```ignore
/// use conduit::middleware::Logging;
///
/// let client = conduit::Client::builder().with(Logging::debug()).build();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Logging {
    level: LogLevel,
}

impl Logging {
    /// Create a logging middleware with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logging middleware that logs at debug level.
    #[must_use]
    pub const fn debug() -> Self {
        Self {
            level: LogLevel::Debug,
        }
    }

    /// The configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }
}

impl Middleware<Context> for Logging {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a, Context>) -> BoxFuture<'a, Result<()>> {
        let method = ctx.request.method();
        let url = ctx.request.url().to_string();
        let level = self.level;

        let span = span!(Level::INFO, "http_request", %method, %url);

        Box::pin(
            async move {
                let start = Instant::now();

                match level {
                    LogLevel::Debug => {
                        debug!(
                            method = %method,
                            url = %url,
                            headers = ?ctx.request.headers(),
                            "sending request"
                        );
                    }
                    LogLevel::Info => {
                        info!(method = %method, url = %url, "sending request");
                    }
                }

                let result = next.run(ctx).await;

                // Saturating conversion to u64
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                match (&result, &ctx.response) {
                    (Ok(()), Some(response)) => {
                        info!(status = response.status(), elapsed_ms, "request completed");
                    }
                    (Ok(()), None) => {
                        debug!(elapsed_ms, "request completed without response");
                    }
                    (Err(err), _) => {
                        warn!(error = %err, kind = %err.kind(), elapsed_ms, "request failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
