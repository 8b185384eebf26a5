//! Onion-model middleware dispatch.
//!
//! A [`Pipeline`] runs its middleware around a terminal [`Handler`]. Code a
//! middleware runs before awaiting [`Next::run`] executes outer to inner, code
//! after it executes inner to outer. Not running `next` short-circuits the
//! rest of the chain; `Next` is consumed when run, so a middleware cannot
//! re-enter the chain.
//!
//! ```
//! use conduit_core::pipeline::{Pipeline, from_fn, handler_fn};
//!
//! # tokio_test_block_on(async {
//! let pipeline = Pipeline::new()
//!     .with(from_fn(|log: &mut Vec<&str>, next| {
//!         Box::pin(async move {
//!             log.push("outer-pre");
//!             next.run(log).await?;
//!             log.push("outer-post");
//!             Ok(())
//!         })
//!     }));
//!
//! let terminal = handler_fn(|log: &mut Vec<&str>| {
//!     Box::pin(async move {
//!         log.push("terminal");
//!         Ok(())
//!     })
//! });
//!
//! let mut log = Vec::new();
//! pipeline.dispatch(&mut log, &terminal, &[]).await.unwrap();
//! assert_eq!(log, ["outer-pre", "terminal", "outer-post"]);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

pub use futures_util::future::BoxFuture;

use crate::Result;

/// Cross-cutting behavior wrapped around a terminal handler.
pub trait Middleware<C>: Send + Sync {
    /// Handle one dispatch. Run `next` at most once to continue the chain.
    fn handle<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, Result<()>>;
}

/// The innermost step of a dispatch.
pub trait Handler<C>: Send + Sync {
    /// Execute the call the chain wraps.
    fn call<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, Result<()>>;
}

/// Continuation handed to a middleware: the rest of the chain plus the
/// terminal handler.
pub struct Next<'a, C> {
    chain: &'a [Arc<dyn Middleware<C>>],
    terminal: &'a dyn Handler<C>,
}

impl<'a, C> Next<'a, C> {
    /// Run the remainder of the chain.
    pub fn run<'b>(self, ctx: &'b mut C) -> BoxFuture<'b, Result<()>>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((middleware, rest)) => middleware.handle(
                ctx,
                Next {
                    chain: rest,
                    terminal: self.terminal,
                },
            ),
            None => self.terminal.call(ctx),
        }
    }

    /// Number of middleware left before the terminal handler.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.chain.len()
    }
}

impl<C> fmt::Debug for Next<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Ordered middleware list.
///
/// Registration is copy-on-write: [`Pipeline::middlewares`] hands out a
/// snapshot that later registrations do not affect.
pub struct Pipeline<C> {
    middlewares: Arc<[Arc<dyn Middleware<C>>]>,
}

impl<C> Clone for Pipeline<C> {
    fn clone(&self) -> Self {
        Self {
            middlewares: Arc::clone(&self.middlewares),
        }
    }
}

impl<C> Default for Pipeline<C> {
    fn default() -> Self {
        Self {
            middlewares: Arc::from(Vec::new()),
        }
    }
}

impl<C> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

impl<C> Pipeline<C> {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn push(&mut self, middleware: impl Middleware<C> + 'static) {
        self.push_arc(Arc::new(middleware));
    }

    /// Append a shared middleware.
    pub fn push_arc(&mut self, middleware: Arc<dyn Middleware<C>>) {
        let mut middlewares = self.middlewares.to_vec();
        middlewares.push(middleware);
        self.middlewares = middlewares.into();
    }

    /// Append a middleware, builder style.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware<C> + 'static) -> Self {
        self.push(middleware);
        self
    }

    /// Read-only snapshot of the registered middleware.
    #[must_use]
    pub fn middlewares(&self) -> Arc<[Arc<dyn Middleware<C>>]> {
        Arc::clone(&self.middlewares)
    }

    /// Number of registered middleware.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns `true` if no middleware is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run registered middleware, then `extra`, around `terminal`.
    ///
    /// Errors are neither caught nor transformed: they unwind through every
    /// middleware that already ran `next` and come out of this call.
    pub async fn dispatch(
        &self,
        ctx: &mut C,
        terminal: &dyn Handler<C>,
        extra: &[Arc<dyn Middleware<C>>],
    ) -> Result<()> {
        let chain = self
            .middlewares
            .iter()
            .chain(extra)
            .cloned()
            .collect::<Vec<_>>();
        tracing::debug!(middlewares = chain.len(), "dispatch");

        Next {
            chain: &chain,
            terminal,
        }
        .run(ctx)
        .await
    }
}

/// Middleware built from a closure, see [`from_fn`].
pub struct FromFn<F> {
    f: F,
}

impl<F> fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Adapt a closure into a [`Middleware`].
///
/// The closure returns a boxed future, typically `Box::pin(async move { .. })`.
pub fn from_fn<C, F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    FromFn { f }
}

impl<C, F> Middleware<C> for FromFn<F>
where
    F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    fn handle<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, Result<()>> {
        (self.f)(ctx, next)
    }
}

/// Terminal handler built from a closure, see [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

/// Adapt a closure into a [`Handler`].
pub fn handler_fn<C, F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    HandlerFn { f }
}

impl<C, F> Handler<C> for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, Result<()>> {
        (self.f)(ctx)
    }
}
