//! Transport abstraction.
//!
//! A [`Transport`] performs the actual call. It is the only seam the pipeline
//! needs to know about: HTTP, in-memory fakes and decorators such as
//! [`crate::retry::Retry`] all implement it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::pipeline::{BoxFuture, Handler};
use crate::{Context, Request, Response, Result};

/// Executes a request.
///
/// Implementations should return taxonomy errors; anything else can be
/// mapped through [`crate::Error::normalize`].
pub trait Transport: Send + Sync {
    /// Execute `request` and return the decoded response.
    fn request(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn request(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        (**self).request(request)
    }
}

impl<T: Transport> Transport for &T {
    fn request(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        (**self).request(request)
    }
}

/// Transport built from a closure, see [`transport_fn`].
#[derive(Clone)]
pub struct TransportFn<F> {
    f: F,
}

impl<F> fmt::Debug for TransportFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFn").finish_non_exhaustive()
    }
}

/// Adapt an async closure into a [`Transport`].
///
/// Handy for fakes in tests:
///
/// ```
/// use std::collections::HashMap;
/// use std::sync::Arc;
///
/// use conduit_core::transport::{Transport, transport_fn};
/// use conduit_core::{Body, Request, Response};
///
/// let transport = transport_fn(|request: Request| async move {
///     Ok(Response::new(204, "No Content", HashMap::new(), Body::Empty, Arc::new(request)))
/// });
/// # let _ = transport;
/// ```
pub fn transport_fn<F, Fut>(f: F) -> TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    TransportFn { f }
}

impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    fn request(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        (self.f)(request)
    }
}

/// Terminal handler that sends the context's request through a transport.
///
/// On success the response lands in `ctx.response`. On failure the error is
/// tagged with the request, stored in `ctx.error` and returned.
#[derive(Debug, Clone)]
pub struct TransportHandler<T> {
    transport: T,
}

impl<T> TransportHandler<T> {
    /// Wrap a transport.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The wrapped transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Handler<Context> for TransportHandler<T> {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.transport.request(ctx.request.clone()).await {
                Ok(response) => {
                    ctx.response = Some(response);
                    Ok(())
                }
                Err(error) => {
                    let error = error.or_request(&Arc::new(ctx.request.clone()));
                    ctx.error = Some(error.clone());
                    Err(error)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::pipeline::Pipeline;
    use crate::{Body, Error};

    fn ok_transport() -> impl Transport {
        transport_fn(|request: Request| async move {
            Ok(Response::new(
                200,
                "OK",
                HashMap::new(),
                Body::from("pong"),
                Arc::new(request),
            ))
        })
    }

    #[tokio::test]
    async fn handler_stores_response() {
        let handler = TransportHandler::new(ok_transport());
        let mut ctx = Context::new(Request::get("https://example.com/ping").build());

        Pipeline::new()
            .dispatch(&mut ctx, &handler, &[])
            .await
            .expect("dispatch");

        let response = ctx.response.expect("response");
        assert_eq!(response.text(), Some("pong"));
        assert_eq!(response.request().url(), "https://example.com/ping");
        assert!(ctx.error.is_none());
    }

    #[tokio::test]
    async fn handler_records_and_returns_error() {
        let handler = TransportHandler::new(transport_fn(|_request: Request| async {
            Err(Error::network("connection refused"))
        }));
        let mut ctx = Context::new(Request::get("https://example.com/ping").build());

        let error = Pipeline::new()
            .dispatch(&mut ctx, &handler, &[])
            .await
            .expect_err("network failure");

        assert!(error.is_network());
        assert_eq!(
            error.request().map(Request::url),
            Some("https://example.com/ping")
        );
        assert!(ctx.error.is_some_and(|stored| stored.is_network()));
        assert!(ctx.response.is_none());
    }

    async fn call(transport: impl Transport, url: &str) -> Result<Response> {
        transport.request(Request::get(url).build()).await
    }

    #[tokio::test]
    async fn arc_and_ref_forward() {
        let transport = Arc::new(ok_transport());
        let by_arc = call(Arc::clone(&transport), "/a").await.expect("arc");
        let by_ref = call(&*transport, "/b").await.expect("ref");
        assert_eq!(by_arc.request().url(), "/a");
        assert_eq!(by_ref.request().url(), "/b");
    }
}
