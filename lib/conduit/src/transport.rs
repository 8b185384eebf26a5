//! HTTP transport over hyper-util, with connection pooling and TLS.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use conduit_core::{AbortSignal, Body, Error, Request, Response, Result, Transport};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use http_body_util::{BodyExt, BodyStream, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};

use crate::{config::ClientConfig, connector::https_connector};

/// Byte chunks of a response body that is read incrementally.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// The status line and headers of a response whose body is still streaming.
pub struct StreamingResponse {
    /// Status code.
    pub status: u16,
    /// Canonical reason phrase.
    pub status_text: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// The body, chunk by chunk.
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// HTTP transport using hyper-util.
///
/// Each call resolves the request URL, sends it, and reads the whole body
/// before decoding it according to the request's response type. Non-2xx
/// statuses become [`conduit_core::ErrorKind::Http`] errors that carry the
/// decoded response.
#[derive(Clone)]
pub struct HyperTransport {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl HyperTransport {
    /// Create a transport from `config`.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let connector = https_connector(config.connect_timeout);

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_idle_per_host)
            .retry_canceled_requests(config.retry_canceled_requests)
            .build(connector);

        Self {
            inner,
            timeout: config.timeout,
        }
    }

    /// Build a hyper request, adding an `Accept` header unless one is set.
    fn build_hyper_request(request: &Request, accept: &str) -> Result<http::Request<Full<Bytes>>> {
        let url = request.resolve_url()?;

        let mut builder = http::Request::builder()
            .method(request.method().as_str())
            .uri(url.as_str());

        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request
            .headers()
            .keys()
            .any(|name| name.eq_ignore_ascii_case("accept"))
        {
            builder = builder.header(http::header::ACCEPT, accept);
        }

        let body = request.body().cloned().map_or_else(Full::default, Full::new);
        let mut http_request = builder.body(body).map_err(|e| {
            Error::unknown(format!("invalid request: {e}")).with_source(e)
        })?;

        *http_request.extensions_mut() = request.extensions().clone();

        Ok(http_request)
    }

    /// Extract response headers as a `HashMap`.
    fn extract_headers(headers: &http::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect()
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let request = Arc::new(request);
        let response_type = request.response_type();
        let hyper_request = Self::build_hyper_request(&request, response_type.accept())?;
        let timeout = request.timeout().unwrap_or(self.timeout);

        let exchange = async {
            let response = self
                .inner
                .request(hyper_request)
                .await
                .map_err(map_hyper_error)?;
            let status = response.status();
            let headers = Self::extract_headers(response.headers());
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::network(format!("failed to read body: {e}")).with_source(e))?
                .to_bytes();
            Ok((status, headers, bytes))
        };
        let (status, headers, bytes) = bounded(exchange, timeout, request.signal()).await?;

        let status_text = status.canonical_reason().unwrap_or_default();
        if status.is_success() {
            let body = Body::decode(bytes, response_type)
                .map_err(|e| e.with_request(Arc::clone(&request)))?;
            return Ok(Response::new(
                status.as_u16(),
                status_text,
                headers,
                body,
                request,
            ));
        }

        let body = Body::decode(bytes.clone(), response_type).unwrap_or_else(|_| {
            String::from_utf8(bytes.to_vec()).map_or(Body::Bytes(bytes), Body::Text)
        });
        let response = Response::new(
            status.as_u16(),
            status_text,
            headers,
            body,
            Arc::clone(&request),
        );
        Err(Error::http(status.as_u16(), status_text)
            .with_request(request)
            .with_response(response))
    }

    /// Send `request` and return as soon as the status line is in.
    ///
    /// No timeout applies here: the body is read by the caller, and a
    /// streaming session enforces its own deadline.
    pub async fn open(&self, request: &Request, accept: &str) -> Result<StreamingResponse> {
        let hyper_request = Self::build_hyper_request(request, accept)?;
        let response = self
            .inner
            .request(hyper_request)
            .await
            .map_err(map_hyper_error)?;

        let status = response.status();
        let headers = Self::extract_headers(response.headers());
        let body = BodyStream::new(response.into_body())
            .map_ok(|frame| frame.into_data().unwrap_or_default())
            .map_err(|e| Error::network(format!("stream interrupted: {e}")).with_source(e));

        Ok(StreamingResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: Box::pin(body),
        })
    }
}

impl Transport for HyperTransport {
    fn request(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        self.execute(request)
    }
}

/// Run `exchange` under `timeout`, giving up early if `signal` fires.
async fn bounded<T>(
    exchange: impl Future<Output = Result<T>>,
    timeout: Duration,
    signal: Option<&AbortSignal>,
) -> Result<T> {
    let timed = tokio::time::timeout(timeout, exchange);
    let outcome = match signal {
        Some(signal) => {
            tokio::select! {
                biased;
                reason = signal.aborted() => return Err(reason.into_error()),
                outcome = timed => outcome,
            }
        }
        None => timed.await,
    };

    outcome.map_err(|elapsed| {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        Error::timeout(format!("request timed out after {millis}ms")).with_source(elapsed)
    })?
}

#[allow(clippy::needless_pass_by_value)]
fn map_hyper_error(err: hyper_util::client::legacy::Error) -> Error {
    let message = if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    };
    Error::network(message).with_source(err)
}
