//! HTTP client configuration

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    abort::{default_abort_controller, AbortControllerFactory},
    client::{HttpTransport, ReqwestTransport},
    error::Result,
    event_source::{EventStreamTransport, ReqwestEventStreamTransport},
    middleware::{HttpInterceptor, OnRetry, RetryPolicy},
    multipart::{default_form_data, MultipartFactory},
};

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Default per-call timeout (none = wait forever)
    #[serde(default)]
    pub timeout: Option<Duration>,

    /// Connection timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// HTTP/HTTPS proxy URL
    #[serde(default)]
    pub proxy: Option<String>,

    /// Custom user agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum redirects to follow (0 = no redirects)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: default_connect_timeout(),
            proxy: None,
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl HttpConfig {
    /// Create a new HTTP config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config for fast operations (5s timeout)
    pub fn fast() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Create config for long operations (60s timeout)
    pub fn long() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set proxy URL
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Set user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

// Default value functions for serde
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!("fetchkit/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    10
}

/// Collaborators and global hooks shared by every call
#[derive(Clone)]
pub struct FetchConfig {
    /// Prepended to generated paths
    pub base_url: String,
    pub transport: Arc<dyn HttpTransport>,
    /// Builds a cancellation token per attempt
    pub abort_controller: Option<AbortControllerFactory>,
    /// Builds multipart bodies for `form_data`
    pub form_data: Option<MultipartFactory>,
    pub event_source: Option<Arc<dyn EventStreamTransport>>,
    /// Run before per-call interceptors
    pub interceptors: Vec<Arc<dyn HttpInterceptor>>,
    /// Default request timeout
    pub timeout: Option<Duration>,
    /// Replaces the default retry policy
    pub should_retry: Option<Arc<dyn RetryPolicy>>,
    pub on_retry: Option<OnRetry>,
}

impl FetchConfig {
    /// Config around a bare transport; no cancellation, multipart or streaming support
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url: String::new(),
            transport,
            abort_controller: None,
            form_data: None,
            event_source: None,
            interceptors: Vec::new(),
            timeout: None,
            should_retry: None,
            on_retry: None,
        }
    }

    /// Fully wired config backed by reqwest
    pub fn from_http_config(config: &HttpConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.clone())?;
        let event_source = ReqwestEventStreamTransport::from_client(transport.inner().clone());
        Ok(Self {
            abort_controller: Some(default_abort_controller()),
            form_data: Some(default_form_data()),
            event_source: Some(Arc::new(event_source)),
            timeout: config.timeout,
            ..Self::new(Arc::new(transport))
        })
    }

    /// Create config with default transport settings
    pub fn with_defaults() -> Result<Self> {
        Self::from_http_config(&HttpConfig::default())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_abort_controller(mut self, factory: AbortControllerFactory) -> Self {
        self.abort_controller = Some(factory);
        self
    }

    pub fn with_form_data(mut self, factory: MultipartFactory) -> Self {
        self.form_data = Some(factory);
        self
    }

    pub fn with_event_source(mut self, transport: Arc<dyn EventStreamTransport>) -> Self {
        self.event_source = Some(transport);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn HttpInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_should_retry(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.should_retry = Some(policy);
        self
    }

    pub fn with_on_retry(mut self, on_retry: OnRetry) -> Self {
        self.on_retry = Some(on_retry);
        self
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("base_url", &self.base_url)
            .field("abort_controller", &self.abort_controller.is_some())
            .field("form_data", &self.form_data.is_some())
            .field("event_source", &self.event_source.is_some())
            .field("interceptors", &self.interceptors.len())
            .field("timeout", &self.timeout)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Per-call overrides
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Run after the configured interceptors
    pub interceptors: Vec<Arc<dyn HttpInterceptor>>,
    /// Resolve non-2xx responses instead of failing
    pub no_http_exceptions: bool,
    /// Replaces the configured or default retry policy for this call
    pub should_retry: Option<Arc<dyn RetryPolicy>>,
    /// Fired before the configured `on_retry`
    pub on_retry: Option<OnRetry>,
    pub timeout: Option<Duration>,
    /// Called once per attempt, so it must hand out a new controller each time
    pub abort_controller_factory: Option<AbortControllerFactory>,
    /// Non-2xx statuses that resolve instead of failing
    pub expect: Vec<u16>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn HttpInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_no_http_exceptions(mut self, enabled: bool) -> Self {
        self.no_http_exceptions = enabled;
        self
    }

    pub fn with_should_retry(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.should_retry = Some(policy);
        self
    }

    pub fn with_on_retry(mut self, on_retry: OnRetry) -> Self {
        self.on_retry = Some(on_retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_abort_controller_factory(mut self, factory: AbortControllerFactory) -> Self {
        self.abort_controller_factory = Some(factory);
        self
    }

    pub fn with_expect(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.expect.extend(codes);
        self
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("interceptors", &self.interceptors.len())
            .field("no_http_exceptions", &self.no_http_exceptions)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("timeout", &self.timeout)
            .field(
                "abort_controller_factory",
                &self.abort_controller_factory.is_some(),
            )
            .field("expect", &self.expect)
            .finish()
    }
}
