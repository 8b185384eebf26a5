//! Retry decorator for transports.
//!
//! Retries wrap the [`Transport`] rather than living in the middleware chain:
//! a middleware may run its continuation only once, so a fresh attempt has to
//! happen inside the terminal call. The rest of the chain only sees the final
//! outcome.
//!
//! ```
//! use std::time::Duration;
//!
//! use conduit_core::retry::{Backoff, RetryLayer, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3)
//!     .with_backoff(Backoff::Linear)
//!     .with_base_delay(Duration::from_millis(100));
//!
//! assert_eq!(policy.delay(0), Duration::from_millis(100));
//! assert_eq!(policy.delay(1), Duration::from_millis(200));
//!
//! let _layer = RetryLayer::new(policy);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::transport::Transport;
use crate::{AbortError, AbortSignal, Error, Request, Response, Result};

type Predicate = Arc<dyn Fn(&Error, u32) -> bool + Send + Sync>;
type Observer = Arc<dyn Fn(&Error, u32) + Send + Sync>;

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// `base * (attempt + 1)`, no jitter.
    Linear,
    /// `base * 2^attempt` plus up to 25% jitter.
    #[default]
    Exponential,
}

/// How a [`Retry`] decorator decides and waits.
///
/// Built once per decorator and shared by every call through it.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    base_delay: Duration,
    max_delay: Duration,
    retryable_statuses: HashSet<u16>,
    predicate: Option<Predicate>,
    on_retry: Option<Observer>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("retryable_statuses", &self.retryable_statuses)
            .field("predicate", &self.predicate.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            predicate: None,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` additional attempts.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Set the backoff shape.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Replace the set of HTTP statuses worth retrying.
    #[must_use]
    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Decide retryability with a custom predicate `(error, attempt)`.
    ///
    /// The predicate replaces the default classification; aborted calls are
    /// never retried either way.
    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&Error, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Observe each retry with `(error, attempt_number)`, starting at 1.
    #[must_use]
    pub fn on_retry(mut self, observer: impl Fn(&Error, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Additional attempts allowed after the first one.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns `true` if `error` from attempt `attempt` deserves another try.
    #[must_use]
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if error.is_aborted() {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            return predicate(error, attempt);
        }
        if error.is_http() {
            return error
                .status()
                .is_some_and(|status| self.retryable_statuses.contains(&status));
        }
        error.is_retryable()
    }

    /// Delay to wait after the failed attempt `attempt` (zero-based).
    ///
    /// Linear delays never exceed the ceiling; exponential ones never exceed
    /// it by more than the 25% jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self
                .base_delay
                .saturating_mul(attempt.saturating_add(1))
                .min(self.max_delay),
            Backoff::Exponential => {
                let capped = self
                    .base_delay
                    .saturating_mul(2_u32.saturating_pow(attempt))
                    .min(self.max_delay);
                let jitter = rand::thread_rng().gen_range(0.0..=0.25);
                capped.saturating_add(capped.mul_f64(jitter))
            }
        }
    }
}

/// A [`Transport`] that retries failed calls of the wrapped one.
#[derive(Debug, Clone)]
pub struct Retry<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retry<T> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub const fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The wrapped transport.
    #[must_use]
    pub const fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Retry<T> {
    async fn execute(&self, request: Request) -> Result<Response> {
        let signal = request.signal().cloned();
        let max_retries = self.policy.max_retries;
        let mut attempt = 0;

        loop {
            if let Some(error) = signal.as_ref().and_then(aborted_error) {
                return Err(error.with_request(request));
            }

            let error = match self.inner.request(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if error.is_aborted() {
                return Err(error);
            }
            if attempt >= max_retries {
                tracing::debug!(attempts = attempt + 1, error = %error, "retries exhausted");
                return Err(error);
            }
            if !self.policy.should_retry(&error, attempt) {
                return Err(error);
            }

            if let Some(observer) = &self.policy.on_retry {
                observer(&error, attempt + 1);
            }
            let delay = self.policy.delay(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying request"
            );

            match &signal {
                Some(signal) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        reason = signal.aborted() => {
                            return Err(Error::normalize(AbortError::new(reason)).with_request(request));
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }
}

fn aborted_error(signal: &AbortSignal) -> Option<Error> {
    signal
        .check()
        .err()
        .map(Error::normalize)
}

impl<T: Transport> Transport for Retry<T> {
    fn request(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        self.execute(request)
    }
}

/// [`tower::Layer`] producing [`Retry`] transports.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    /// Create a layer applying `policy`.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<T> tower::Layer<T> for RetryLayer {
    type Service = Retry<T>;

    fn layer(&self, inner: T) -> Self::Service {
        Retry::new(inner, self.policy.clone())
    }
}
