//! Client configuration types.

use std::collections::HashMap;
use std::time::Duration;

use conduit_core::{RequestDefaults, ResponseType};
use url::Url;

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout duration, used when a request sets none.
    pub timeout: Duration,
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_idle_per_host: usize,
    /// Idle connection timeout.
    pub pool_idle_timeout: Duration,
    /// Whether the connection pool retries requests cancelled by a closing connection.
    pub retry_canceled_requests: bool,
    /// Base URL for relative request URLs.
    pub base_url: Option<Url>,
    /// Headers added to every request that does not set them.
    pub headers: HashMap<String, String>,
    /// Decoding used when a request does not choose one.
    pub response_type: ResponseType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            retry_canceled_requests: true,
            base_url: None,
            headers: HashMap::new(),
            response_type: ResponseType::Json,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Options merged into every request.
    #[must_use]
    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            base_url: self.base_url.clone(),
            headers: self.headers.clone(),
            timeout: Some(self.timeout),
            response_type: Some(self.response_type),
        }
    }

    /// Options merged into streaming requests: no default timeout, since a
    /// stream is expected to stay open.
    #[must_use]
    pub fn stream_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            timeout: None,
            ..self.request_defaults()
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    pool_idle_per_host: Option<usize>,
    pool_idle_timeout: Option<Duration>,
    retry_canceled_requests: Option<bool>,
    base_url: Option<Url>,
    headers: HashMap<String, String>,
    response_type: Option<ResponseType>,
}

impl ClientConfigBuilder {
    /// Set the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub const fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.pool_idle_per_host = Some(count);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Set whether the pool retries requests cancelled by a closing connection.
    #[must_use]
    pub const fn retry_canceled_requests(mut self, retry: bool) -> Self {
        self.retry_canceled_requests = Some(retry);
        self
    }

    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Add a default header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the default response decoding.
    #[must_use]
    pub const fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            pool_idle_per_host: self
                .pool_idle_per_host
                .unwrap_or(defaults.pool_idle_per_host),
            pool_idle_timeout: self.pool_idle_timeout.unwrap_or(defaults.pool_idle_timeout),
            retry_canceled_requests: self
                .retry_canceled_requests
                .unwrap_or(defaults.retry_canceled_requests),
            base_url: self.base_url,
            headers: self.headers,
            response_type: self.response_type.unwrap_or(defaults.response_type),
        }
    }
}
