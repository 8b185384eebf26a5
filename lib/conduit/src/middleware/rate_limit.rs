//! Rate limiting middleware using governor.
//!
//! Limits the rate of outgoing requests with a token bucket.

use std::num::NonZeroU32;
use std::sync::Arc;

use conduit_core::{BoxFuture, Context, Middleware, Next, Result};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::InMemoryState};

/// Type alias for the governor rate limiter.
type GovernorLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// Middleware that waits for a token before letting a request through.
///
/// Clones share the same bucket.
///
/// # Example
///
/// ```ignore
/// use std::num::NonZeroU32;
/// use conduit::middleware::RateLimit;
///
/// let limit = RateLimit::per_second(NonZeroU32::new(10).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: Arc<GovernorLimiter>,
}

impl RateLimit {
    /// Allow `count` requests per second.
    #[must_use]
    pub fn per_second(count: NonZeroU32) -> Self {
        Self::with_quota(Quota::per_second(count))
    }

    /// Allow `count` requests per minute.
    #[must_use]
    pub fn per_minute(count: NonZeroU32) -> Self {
        Self::with_quota(Quota::per_minute(count))
    }

    /// Use a custom quota.
    #[must_use]
    pub fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl Middleware<Context> for RateLimit {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a, Context>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.limiter.check().is_err() {
                tracing::debug!(url = ctx.request.url(), "rate limited, waiting");
                self.limiter.until_ready().await;
            }
            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    use assert2::{check, let_assert};
    use conduit_core::{Pipeline, Request, handler_fn};

    use super::*;

    #[tokio::test]
    async fn burst_within_quota_is_immediate() {
        let_assert!(Some(count) = NonZeroU32::new(5));
        let pipeline = Pipeline::new().with(RateLimit::per_second(count));
        let calls = AtomicU32::new(0);
        let terminal = handler_fn(|_ctx: &mut Context| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });

        let start = Instant::now();
        for _ in 0..5 {
            let mut ctx = Context::new(Request::get("http://localhost/").build());
            let_assert!(Ok(()) = pipeline.dispatch(&mut ctx, &terminal, &[]).await);
        }

        check!(calls.load(Ordering::SeqCst) == 5);
        check!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn over_quota_waits() {
        let_assert!(Some(count) = NonZeroU32::new(10));
        let pipeline = Pipeline::new().with(RateLimit::per_second(count));
        let terminal = handler_fn(|_ctx: &mut Context| {
            Box::pin(async { Ok(()) })
        });

        let start = Instant::now();
        for _ in 0..11 {
            let mut ctx = Context::new(Request::get("http://localhost/").build());
            let_assert!(Ok(()) = pipeline.dispatch(&mut ctx, &terminal, &[]).await);
        }

        // The 11th request waits for a replenished token (100ms at 10/s).
        check!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn clones_share_bucket() {
        let_assert!(Some(count) = NonZeroU32::new(1));
        let limit = RateLimit::per_minute(count);
        let clone = limit.clone();

        check!(limit.limiter.check().is_ok());
        check!(clone.limiter.check().is_err());
    }
}
