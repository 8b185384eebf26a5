//! Request descriptions.
//!
//! A [`Request`] describes one outgoing call without committing to a
//! transport. Use [`Request::builder`] (or the per-method shortcuts) to create
//! one; it is not mutated once dispatch starts.
//!
//! ```
//! use conduit_core::{Method, Request};
//!
//! let request = Request::get("/users")
//!     .base_url("https://api.example.com".parse().unwrap())
//!     .header("Accept", "application/json")
//!     .query("page", "1")
//!     .query_opt("filter", None::<String>)
//!     .build();
//!
//! assert_eq!(request.method(), Method::Get);
//! assert_eq!(
//!     request.resolve_url().unwrap().as_str(),
//!     "https://api.example.com/users?page=1"
//! );
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::{AbortSignal, Error, Method, ResponseType, Result};

/// A transport-agnostic request description.
#[derive(Debug, Clone, Default)]
pub struct Request {
    method: Method,
    url: String,
    base_url: Option<Url>,
    headers: HashMap<String, String>,
    query: Vec<(String, Option<String>)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    response_type: ResponseType,
    response_type_set: bool,
    signal: Option<AbortSignal>,
    extensions: http::Extensions,
}

impl Request {
    /// Creates a new [`RequestBuilder`].
    #[must_use]
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    /// Shortcut for a GET builder.
    #[must_use]
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::Get, url)
    }

    /// Shortcut for a POST builder.
    #[must_use]
    pub fn post(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::Post, url)
    }

    /// Shortcut for a PUT builder.
    #[must_use]
    pub fn put(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::Put, url)
    }

    /// Shortcut for a PATCH builder.
    #[must_use]
    pub fn patch(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::Patch, url)
    }

    /// Shortcut for a DELETE builder.
    #[must_use]
    pub fn delete(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::Delete, url)
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// URL as given, possibly relative to [`Self::base_url`].
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Base URL used to resolve a relative [`Self::url`].
    #[must_use]
    pub const fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Single header value by name (exact key match).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Query parameters, including the `None` entries.
    #[must_use]
    pub fn query(&self) -> &[(String, Option<String>)] {
        &self.query
    }

    /// Query parameters with `None` entries dropped.
    pub fn query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.query
            .iter()
            .filter_map(|(name, value)| value.as_deref().map(|value| (name.as_str(), value)))
    }

    /// Request body.
    #[must_use]
    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Expected response decoding.
    #[must_use]
    pub const fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Caller-supplied cancellation signal.
    #[must_use]
    pub const fn signal(&self) -> Option<&AbortSignal> {
        self.signal.as_ref()
    }

    /// Returns `true` if the cancellation signal already fired.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.signal.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    /// Extension bag for middleware and transports.
    #[must_use]
    pub const fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    /// Absolute URL: base URL joined with [`Self::url`], plus the non-`None`
    /// query parameters.
    ///
    /// # Errors
    ///
    /// Returns an unknown-kind error if the URL cannot be parsed.
    pub fn resolve_url(&self) -> Result<Url> {
        let mut url = match &self.base_url {
            Some(base) => join(base, &self.url)?,
            None => Url::parse(&self.url).map_err(|e| invalid_url(&self.url, e))?,
        };

        let mut pairs = self.query_pairs().peekable();
        if pairs.peek().is_some() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    /// Cache key: method, URL and serialized non-`None` parameters.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self.resolve_url() {
            Ok(url) => format!("{} {url}", self.method),
            Err(_) => {
                let params = self
                    .query_pairs()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join("&");
                format!("{} {}?{params}", self.method, self.url)
            }
        }
    }

    /// Fill the unset fields from `defaults`.
    ///
    /// Headers set on the request win over default headers. Runs once,
    /// before dispatch.
    #[must_use]
    pub fn merge_defaults(mut self, defaults: &RequestDefaults) -> Self {
        if self.base_url.is_none() {
            self.base_url.clone_from(&defaults.base_url);
        }
        for (name, value) in &defaults.headers {
            self.headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        if self.timeout.is_none() {
            self.timeout = defaults.timeout;
        }
        if let Some(response_type) = defaults.response_type {
            if !self.response_type_set {
                self.response_type = response_type;
            }
        }
        self
    }

    /// Consume into a builder to derive a new request.
    #[must_use]
    pub fn into_builder(self) -> RequestBuilder {
        RequestBuilder { request: self }
    }
}

fn join(base: &Url, url: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(url) {
        return Ok(absolute);
    }
    // "https://host/api" + "/users" resolves to "https://host/api/users"
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(url.trim_start_matches('/'))
        .map_err(|e| invalid_url(url, e))
}

fn invalid_url(url: &str, err: url::ParseError) -> Error {
    Error::unknown(format!("invalid URL '{url}': {err}")).with_source(err)
}

/// Default options merged into every request a client issues.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    /// Base URL for relative request URLs.
    pub base_url: Option<Url>,
    /// Headers added when the request does not set them.
    pub headers: HashMap<String, String>,
    /// Timeout used when the request does not set one.
    pub timeout: Option<Duration>,
    /// Decoding used when the request does not choose one.
    pub response_type: Option<ResponseType>,
}

/// Builder for constructing [`Request`] instances.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            request: Request {
                method,
                url: url.into(),
                ..Request::default()
            },
        }
    }

    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.request.base_url = Some(base_url);
        self
    }

    /// Sets a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    /// Sets multiple headers.
    #[must_use]
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.request.headers.extend(headers);
        self
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.push((name.into(), Some(value.into())));
        self
    }

    /// Appends an optional query parameter; `None` is dropped on resolution.
    #[must_use]
    pub fn query_opt(mut self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.request.query.push((name.into(), value.map(Into::into)));
        self
    }

    /// Sets the raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Sets a JSON body and its content type.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn json<T: serde::Serialize>(self, value: &T) -> Result<Self> {
        let body = crate::to_json(value)?;
        Ok(self.header("Content-Type", "application/json").body(body))
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Sets the response decoding.
    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.request.response_type = response_type;
        self.request.response_type_set = true;
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.request.signal = Some(signal);
        self
    }

    /// Inserts a typed value into the extension bag.
    #[must_use]
    pub fn extension<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.request.extensions.insert(value);
        self
    }

    /// Builds the [`Request`].
    #[must_use]
    pub fn build(self) -> Request {
        self.request
    }
}
