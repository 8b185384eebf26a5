//! The client facade: pipeline, transport and default request options.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{
    Connecting, Context, Error, EventSource, Method, Middleware, Pipeline, Request,
    RequestDefaults, Response, ResponseType, Result, Retry, RetryPolicy, StreamConnector,
    Transport, TransportHandler,
};
use serde::Serialize;
use url::Url;

use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::middleware::{BearerAuth, Cache, Logging};
use crate::sse::SseSource;
use crate::transport::HyperTransport;

/// HTTP client running every call through an onion-model middleware pipeline.
///
/// Every convenience method builds a [`Request`] and funnels it through
/// [`Client::request`]: defaults are merged once, registered middleware run
/// in order around a terminal handler that calls the (retry-decorated)
/// transport, and the response or the error comes back out.
///
/// # Example
///
/// ```ignore
/// use conduit::Client;
/// use std::time::Duration;
///
/// let client = Client::builder()
///     .base_url("https://api.example.com".parse()?)
///     .timeout(Duration::from_secs(10))
///     .with_logging()
///     .build();
///
/// let response = client.get("/users/42").await?;
/// ```
pub struct Client<T = HyperTransport, S = SseSource> {
    pipeline: Pipeline<Context>,
    handler: Arc<TransportHandler<Retry<T>>>,
    streams: StreamConnector<S>,
    config: ClientConfig,
    defaults: RequestDefaults,
    stream_defaults: RequestDefaults,
}

impl<T, S> Clone for Client<T, S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            handler: Arc::clone(&self.handler),
            streams: self.streams.clone(),
            config: self.config.clone(),
            defaults: self.defaults.clone(),
            stream_defaults: self.stream_defaults.clone(),
        }
    }
}

impl<T, S> std::fmt::Debug for Client<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("middlewares", &self.pipeline.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with default configuration and no middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Client<T, S>
where
    T: Transport + 'static,
    S: EventSource + 'static,
{
    /// Execute `request` through the pipeline.
    ///
    /// `extra` middleware run after the registered ones, for this call only.
    pub async fn request(
        &self,
        request: Request,
        extra: &[Arc<dyn Middleware<Context>>],
    ) -> Result<Response> {
        let mut ctx = Context::new(request.merge_defaults(&self.defaults));
        self.pipeline
            .dispatch(&mut ctx, self.handler.as_ref(), extra)
            .await?;

        if let Some(response) = ctx.take_response() {
            return Ok(response);
        }
        Err(ctx.error.take().unwrap_or_else(|| {
            Error::unknown("pipeline completed without a response").with_request(ctx.request)
        }))
    }

    /// Execute `request` with the registered middleware only.
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.request(request, &[]).await
    }

    /// Send a GET request.
    pub async fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::get(url).build()).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::delete(url).build()).await
    }

    /// Send a HEAD request.
    pub async fn head(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::builder(Method::Head, url).build()).await
    }

    /// Send an OPTIONS request.
    pub async fn options(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::builder(Method::Options, url).build()).await
    }

    /// Send a POST request with a JSON body.
    pub async fn post<B: Serialize>(&self, url: impl Into<String>, body: &B) -> Result<Response> {
        self.send(Request::post(url).json(body)?.build()).await
    }

    /// Send a PUT request with a JSON body.
    pub async fn put<B: Serialize>(&self, url: impl Into<String>, body: &B) -> Result<Response> {
        self.send(Request::put(url).json(body)?.build()).await
    }

    /// Send a PATCH request with a JSON body.
    pub async fn patch<B: Serialize>(&self, url: impl Into<String>, body: &B) -> Result<Response> {
        self.send(Request::patch(url).json(body)?.build()).await
    }

    /// Open a streaming session for `request`.
    ///
    /// Default headers and base URL apply; the default timeout does not, a
    /// stream stays open until closed, cancelled, or its own timeout fires.
    /// Streams bypass the middleware pipeline.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn stream(&self, request: Request) -> Result<Connecting> {
        self.streams
            .connect(request.merge_defaults(&self.stream_defaults))
    }

    /// Register a middleware on this client.
    ///
    /// Clones made earlier, and dispatches already running, keep the list
    /// they started with.
    pub fn push(&mut self, middleware: impl Middleware<Context> + 'static) {
        self.pipeline.push(middleware);
    }

    /// Snapshot of the registered middleware.
    #[must_use]
    pub fn middlewares(&self) -> Arc<[Arc<dyn Middleware<Context>>]> {
        self.pipeline.middlewares()
    }

    /// The client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying (retry-decorated) transport.
    #[must_use]
    pub fn transport(&self) -> &Retry<T> {
        self.handler.transport()
    }
}

/// Builder for [`Client`].
///
/// # Example
///
/// ```ignore
/// use conduit::{Client, RetryPolicy};
/// use std::time::Duration;
///
/// let client = Client::builder()
///     .timeout(Duration::from_secs(30))
///     .with_retry(RetryPolicy::new(3))
///     .with_bearer_auth("token")
///     .build();
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfigBuilder,
    pipeline: Pipeline<Context>,
    retry: Option<RetryPolicy>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("middlewares", &self.pipeline.len())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ClientBuilder {
    // ========================================================================
    // Core Configuration
    // ========================================================================

    /// Set the default request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.config = self.config.pool_idle_per_host(count);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.pool_idle_timeout(timeout);
        self
    }

    /// Set the base URL for relative request URLs.
    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.config = self.config.base_url(base_url);
        self
    }

    /// Add a default header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config = self.config.header(name, value);
        self
    }

    /// Set the default response decoding.
    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.config = self.config.response_type(response_type);
        self
    }

    // ========================================================================
    // Middleware
    // ========================================================================

    /// Register a middleware. The first registered runs outermost.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware<Context> + 'static) -> Self {
        self.pipeline.push(middleware);
        self
    }

    /// Retry failed transport calls according to `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Register [`Logging`] at info level.
    #[must_use]
    pub fn with_logging(self) -> Self {
        self.with(Logging::new())
    }

    /// Register [`BearerAuth`] with `token`.
    #[must_use]
    pub fn with_bearer_auth(self, token: impl Into<String>) -> Self {
        self.with(BearerAuth::new(token))
    }

    /// Register a [`Cache`] keeping GET responses for `ttl`.
    #[must_use]
    pub fn with_cache(self, ttl: Duration) -> Self {
        self.with(Cache::new(ttl))
    }

    /// Register a rate limit of `count` requests per second.
    #[cfg(feature = "middleware-rate-limit")]
    #[must_use]
    pub fn with_rate_limit_per_second(self, count: std::num::NonZeroU32) -> Self {
        self.with(crate::middleware::RateLimit::per_second(count))
    }

    /// Register a rate limit of `count` requests per minute.
    #[cfg(feature = "middleware-rate-limit")]
    #[must_use]
    pub fn with_rate_limit_per_minute(self, count: std::num::NonZeroU32) -> Self {
        self.with(crate::middleware::RateLimit::per_minute(count))
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build a client over the hyper transport and SSE source.
    #[must_use]
    pub fn build(self) -> Client {
        let config = self.config.clone().build();
        let transport = HyperTransport::new(&config);
        let source = SseSource::new(transport.clone());
        self.build_with(transport, source)
    }

    /// Build a client over a custom transport, streaming with the SSE source.
    #[must_use]
    pub fn build_with_transport<T: Transport + 'static>(self, transport: T) -> Client<T> {
        let config = self.config.clone().build();
        let source = SseSource::new(HyperTransport::new(&config));
        self.build_with(transport, source)
    }

    /// Build a client over a custom transport and event source.
    #[must_use]
    pub fn build_with<T, S>(self, transport: T, source: S) -> Client<T, S>
    where
        T: Transport + 'static,
        S: EventSource + 'static,
    {
        let config = self.config.build();
        let policy = self.retry.unwrap_or_else(|| RetryPolicy::new(0));

        Client {
            pipeline: self.pipeline,
            handler: Arc::new(TransportHandler::new(Retry::new(transport, policy))),
            streams: StreamConnector::new(source),
            defaults: config.request_defaults(),
            stream_defaults: config.stream_defaults(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert2::{check, let_assert};
    use conduit_core::{Body, ErrorKind, EventSink, from_fn, transport_fn};

    use super::*;

    /// Records requests and replies 200 with the request URL as text.
    fn recording(seen: Arc<Mutex<Vec<Request>>>) -> impl Transport {
        transport_fn(move |request: Request| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(request.clone());
                let url = request.resolve_url()?.to_string();
                Ok(Response::new(200, "OK", HashMap::new(), Body::Text(url), Arc::new(request)))
            }
        })
    }

    struct NoStreams;

    impl EventSource for NoStreams {
        async fn connect(&self, _request: Request, sink: EventSink) {
            sink.close();
        }
    }

    struct Idle;

    impl EventSource for Idle {
        async fn connect(&self, _request: Request, _sink: EventSink) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn defaults_are_merged_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let_assert!(Ok(base) = Url::parse("http://api.test/v1/"));
        let client = Client::builder()
            .base_url(base)
            .header("X-Client", "conduit")
            .timeout(Duration::from_secs(5))
            .build_with(recording(Arc::clone(&seen)), NoStreams);

        let_assert!(Ok(response) = client.get("/users").await);
        check!(response.text() == Some("http://api.test/v1/users"));

        let requests = seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let_assert!([request] = requests.as_slice());
        check!(request.header("X-Client") == Some("conduit"));
        check!(request.timeout() == Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn request_headers_win_over_defaults() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = Client::builder()
            .header("X-Client", "default")
            .build_with(recording(Arc::clone(&seen)), NoStreams);

        let request = Request::get("http://api.test/")
            .header("X-Client", "mine")
            .build();
        let_assert!(Ok(_) = client.send(request).await);

        let requests = seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        check!(requests[0].header("X-Client") == Some("mine"));
    }

    #[tokio::test]
    async fn post_serializes_json_body() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = Client::builder().build_with(recording(Arc::clone(&seen)), NoStreams);

        let_assert!(Ok(_) = client.post("http://api.test/users", &serde_json::json!({"name": "Ada"})).await);

        let requests = seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        check!(requests[0].method() == Method::Post);
        check!(requests[0].header("Content-Type") == Some("application/json"));
        let_assert!(Some(body) = requests[0].body());
        check!(body.as_ref() == br#"{"name":"Ada"}"#);
    }

    #[tokio::test]
    async fn extra_middleware_apply_to_one_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = Client::builder().build_with(recording(Arc::clone(&seen)), NoStreams);
        let marker: Arc<dyn Middleware<Context>> =
            Arc::new(from_fn(|ctx: &mut Context, next| {
                Box::pin(async move {
                    ctx.request = std::mem::take(&mut ctx.request)
                        .into_builder()
                        .header("X-Extra", "1")
                        .build();
                    next.run(ctx).await
                })
            }));

        let_assert!(Ok(_) = client.request(Request::get("http://api.test/").build(), &[marker]).await);
        let_assert!(Ok(_) = client.get("http://api.test/").await);

        let requests = seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        check!(requests[0].header("X-Extra") == Some("1"));
        check!(requests[1].header("X-Extra").is_none());
    }

    #[tokio::test]
    async fn error_is_recorded_and_returned() {
        let failing = transport_fn(|_request: Request| async {
            Err::<Response, _>(Error::network("connection refused"))
        });
        let observed = Arc::new(Mutex::new(None));
        let inspect = {
            let observed = Arc::clone(&observed);
            from_fn(move |ctx: &mut Context, next| {
                let observed = Arc::clone(&observed);
                Box::pin(async move {
                    let result = next.run(ctx).await;
                    *observed.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
                        ctx.error.as_ref().map(Error::kind);
                    result
                })
            })
        };
        let client = Client::builder().with(inspect).build_with(failing, NoStreams);

        let_assert!(Err(err) = client.get("http://api.test/").await);
        check!(err.kind() == ErrorKind::Network);
        check!(err.request().map(Request::url) == Some("http://api.test/"));
        check!(*observed.lock().unwrap_or_else(std::sync::PoisonError::into_inner) == Some(ErrorKind::Network));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_policy_wraps_transport() {
        let calls = Arc::new(AtomicU32::new(0));
        let flaky = {
            let calls = Arc::clone(&calls);
            transport_fn(move |request: Request| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        return Err(Error::network("reset"));
                    }
                    Ok(Response::new(200, "OK", HashMap::new(), Body::Empty, Arc::new(request)))
                }
            })
        };
        let client = Client::builder()
            .with_retry(
                RetryPolicy::new(3)
                    .with_backoff(conduit_core::Backoff::Linear)
                    .with_base_delay(Duration::from_millis(100)),
            )
            .build_with(flaky, NoStreams);

        let start = tokio::time::Instant::now();
        let_assert!(Ok(response) = client.get("http://api.test/").await);
        check!(response.status() == 200);
        check!(calls.load(Ordering::SeqCst) == 3);
        check!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn snapshot_unaffected_by_push() {
        let mut client = Client::builder()
            .with(Logging::new())
            .build_with(recording(Arc::default()), NoStreams);
        let before = client.middlewares();

        client.push(Logging::debug());

        check!(before.len() == 1);
        check!(client.middlewares().len() == 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_skips_default_timeout() {
        let client = Client::builder()
            .timeout(Duration::from_secs(1))
            .build_with(recording(Arc::default()), Idle);

        let_assert!(Ok(connecting) = client.stream(Request::get("http://api.test/events").build()));
        let session = connecting.session().clone();
        tokio::time::sleep(Duration::from_secs(5)).await;
        check!(!session.is_terminated());

        session.cancel();
        let_assert!(Ok(()) = session.done().await);
    }
}
