//! Single-fire cancellation latch.
//!
//! An [`AbortController`] owns the trigger; any number of [`AbortSignal`]
//! clones observe it. The first call to [`AbortController::abort`] records its
//! [`AbortReason`], wakes every waiter and runs every registered listener
//! exactly once. Later calls are ignored, so the recorded reason is always the
//! one that fired first.
//!
//! ```
//! use conduit_core::{AbortController, AbortReason};
//!
//! let controller = AbortController::new();
//! let signal = controller.signal();
//!
//! assert!(controller.abort(AbortReason::Timeout));
//! assert!(!controller.abort(AbortReason::Signal));
//! assert_eq!(signal.reason(), Some(AbortReason::Timeout));
//! ```

use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use derive_more::{Display, Error};
use tokio::sync::Notify;

type Listener = Box<dyn FnOnce(AbortReason) + Send>;

/// Why a latch fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AbortReason {
    /// The holder of the session asked for teardown.
    #[display("cancelled")]
    Cancelled,
    /// A caller-supplied signal was aborted.
    #[display("aborted by caller")]
    Signal,
    /// A timeout elapsed.
    #[display("timed out")]
    Timeout,
}

impl AbortReason {
    /// Convert into the matching taxonomy error.
    #[must_use]
    pub fn into_error(self) -> crate::Error {
        match self {
            Self::Timeout => crate::Error::timeout("request timed out"),
            Self::Cancelled | Self::Signal => crate::Error::aborted(format!("request {self}")),
        }
    }
}

/// The exception a transport raises when it observes an aborted signal.
///
/// [`crate::Error::normalize`] maps it to the aborted kind (or timeout, when
/// the latch fired because of a timeout).
#[derive(Debug, Clone, Copy, Display, Error)]
#[display("operation aborted: {reason}")]
pub struct AbortError {
    #[error(not(source))]
    reason: AbortReason,
}

impl AbortError {
    /// Create an abort error for the given reason.
    #[must_use]
    pub const fn new(reason: AbortReason) -> Self {
        Self { reason }
    }

    /// The reason recorded by the latch.
    #[must_use]
    pub const fn reason(&self) -> AbortReason {
        self.reason
    }
}

struct Latch {
    reason: OnceLock<AbortReason>,
    listeners: Mutex<Vec<Listener>>,
    notify: Notify,
}

/// Observer side of the latch. Cheap to clone.
#[derive(Clone)]
pub struct AbortSignal {
    latch: Arc<Latch>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}

impl AbortSignal {
    /// Returns `true` once the latch has fired.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.latch.reason.get().is_some()
    }

    /// The reason recorded by the first trigger, if any.
    #[must_use]
    pub fn reason(&self) -> Option<AbortReason> {
        self.latch.reason.get().copied()
    }

    /// Register a listener run exactly once when the latch fires.
    ///
    /// If the latch already fired, the listener runs immediately.
    pub fn on_abort(&self, listener: impl FnOnce(AbortReason) + Send + 'static) {
        let mut listeners = self
            .latch
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(reason) = self.reason() {
            drop(listeners);
            listener(reason);
        } else {
            listeners.push(Box::new(listener));
        }
    }

    /// Wait until the latch fires and return its reason.
    pub async fn aborted(&self) -> AbortReason {
        loop {
            let mut notified = pin!(self.latch.notify.notified());
            notified.as_mut().enable();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }

    /// `Err` with an [`AbortError`] if the latch fired.
    pub fn check(&self) -> Result<(), AbortError> {
        self.reason().map_or(Ok(()), |reason| Err(AbortError::new(reason)))
    }
}

/// Trigger side of the latch.
#[derive(Debug, Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    /// Create an unfired latch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: AbortSignal {
                latch: Arc::new(Latch {
                    reason: OnceLock::new(),
                    listeners: Mutex::new(Vec::new()),
                    notify: Notify::new(),
                }),
            },
        }
    }

    /// A new observer of this latch.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fire the latch. Returns `true` if this call was the one that fired it.
    pub fn abort(&self, reason: AbortReason) -> bool {
        let latch = &self.signal.latch;
        if latch.reason.set(reason).is_err() {
            return false;
        }
        tracing::trace!(%reason, "abort latch fired");
        latch.notify.notify_waiters();

        let listeners = std::mem::take(
            &mut *latch
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            listener(reason);
        }
        true
    }

    /// Fire this latch whenever `other` fires, recording `reason`.
    pub fn follow(&self, other: &AbortSignal, reason: AbortReason) {
        let controller = self.clone();
        other.on_abort(move |_| {
            controller.abort(reason);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn first_trigger_wins() {
        let controller = AbortController::new();
        assert!(controller.abort(AbortReason::Signal));
        assert!(!controller.abort(AbortReason::Timeout));
        assert!(!controller.abort(AbortReason::Cancelled));
        assert_eq!(controller.signal().reason(), Some(AbortReason::Signal));
    }

    #[test]
    fn listeners_run_exactly_once() {
        let controller = AbortController::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        controller.signal().on_abort(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.abort(AbortReason::Cancelled);
        controller.abort(AbortReason::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_listener_runs_immediately() {
        let controller = AbortController::new();
        controller.abort(AbortReason::Timeout);

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        controller.signal().on_abort(move |reason| {
            *slot.lock().expect("lock") = Some(reason);
        });

        assert_eq!(*seen.lock().expect("lock"), Some(AbortReason::Timeout));
    }

    #[test]
    fn follow_records_own_reason() {
        let caller = AbortController::new();
        let inner = AbortController::new();
        inner.follow(&caller.signal(), AbortReason::Signal);

        caller.abort(AbortReason::Cancelled);
        assert_eq!(inner.signal().reason(), Some(AbortReason::Signal));
    }

    #[test]
    fn check_reports_abort_error() {
        let controller = AbortController::new();
        assert!(controller.signal().check().is_ok());
        controller.abort(AbortReason::Signal);
        let err = controller.signal().check().expect_err("aborted");
        assert_eq!(err.reason(), AbortReason::Signal);
    }

    #[test]
    fn reason_maps_to_taxonomy() {
        assert!(AbortReason::Timeout.into_error().is_timeout());
        assert!(AbortReason::Signal.into_error().is_aborted());
        assert!(AbortReason::Cancelled.into_error().is_aborted());
    }

    #[tokio::test]
    async fn aborted_wakes_waiters() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.aborted().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.abort(AbortReason::Cancelled);

        let reason = waiter.await.expect("join");
        assert_eq!(reason, AbortReason::Cancelled);
    }
}
