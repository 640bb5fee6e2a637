//! HTTP middleware: interceptors and retry policies

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    config::{FetchConfig, FetchOptions},
    error::{HttpError, Result},
    types::{CallSource, FetchRequest, FetchResponse, TransportResponse},
};

/// Hooks run around every logical call
///
/// Request hooks run once before the first attempt and may rewrite the
/// request. Response hooks run after each response is decoded and may
/// rewrite the result. A hook error fails the call without retrying.
#[async_trait]
pub trait HttpInterceptor: Send + Sync {
    async fn on_request(
        &self,
        _request: &mut FetchRequest,
        _source: Option<&CallSource>,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_response(
        &self,
        _response: &TransportResponse,
        _request: &FetchRequest,
        _source: Option<&CallSource>,
        _result: &mut FetchResponse,
    ) -> Result<()> {
        Ok(())
    }
}

/// Callback fired once a retry has been granted
pub type OnRetry = Arc<dyn Fn(&FetchRequest, &HttpError) + Send + Sync>;

/// Per-call retry state threaded through the attempt loop
#[derive(Clone)]
pub struct RetryContext {
    attempts: u32,
    config: Arc<FetchConfig>,
    options: Arc<FetchOptions>,
}

impl RetryContext {
    pub(crate) fn new(config: Arc<FetchConfig>, options: Arc<FetchOptions>) -> Self {
        Self {
            attempts: 0,
            config,
            options,
        }
    }

    /// Retries granted so far for this call
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub(crate) fn record_retry(&mut self) {
        self.attempts += 1;
    }
}

/// Decides whether a failed attempt is tried again
///
/// A policy may sleep before answering; the next attempt starts as soon as
/// it returns `true`.
#[async_trait]
pub trait RetryPolicy: Send + Sync {
    async fn should_retry(
        &self,
        request: &FetchRequest,
        error: &HttpError,
        context: &RetryContext,
    ) -> bool;
}

/// Default policy: retry refused connections and temporary DNS failures
#[derive(Debug, Clone)]
pub struct AutoRetry {
    /// Delay before each retry; its length caps the number of retries
    pub backoff: Vec<Duration>,
}

impl Default for AutoRetry {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(250),
            ],
        }
    }
}

impl AutoRetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(&self) -> u32 {
        self.backoff.len() as u32
    }

    /// Delay before the retry following `attempts` earlier retries
    pub fn calculate_delay(&self, attempts: u32) -> Option<Duration> {
        self.backoff.get(attempts as usize).copied()
    }
}

#[async_trait]
impl RetryPolicy for AutoRetry {
    async fn should_retry(
        &self,
        _request: &FetchRequest,
        error: &HttpError,
        context: &RetryContext,
    ) -> bool {
        if !error.is_retryable_network() {
            debug!("Non-retryable error: {error}");
            return false;
        }
        let Some(delay) = self.calculate_delay(context.attempts()) else {
            return false;
        };
        tokio::time::sleep(delay).await;
        true
    }
}

struct FnRetryPolicy<F>(F);

#[async_trait]
impl<F> RetryPolicy for FnRetryPolicy<F>
where
    F: Fn(&FetchRequest, &HttpError, &RetryContext) -> bool + Send + Sync,
{
    async fn should_retry(
        &self,
        request: &FetchRequest,
        error: &HttpError,
        context: &RetryContext,
    ) -> bool {
        (self.0)(request, error, context)
    }
}

/// Wrap a synchronous predicate as a [`RetryPolicy`]
pub fn retry_fn<F>(predicate: F) -> Arc<dyn RetryPolicy>
where
    F: Fn(&FetchRequest, &HttpError, &RetryContext) -> bool + Send + Sync + 'static,
{
    Arc::new(FnRetryPolicy(predicate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::HttpTransport, error::TransportError};

    struct NoTransport;

    #[async_trait]
    impl HttpTransport for NoTransport {
        async fn fetch(&self, _url: &str, _request: FetchRequest) -> Result<TransportResponse> {
            Err(TransportError::other("unused").into())
        }
    }

    fn context() -> RetryContext {
        RetryContext::new(
            Arc::new(FetchConfig::new(Arc::new(NoTransport))),
            Arc::new(FetchOptions::default()),
        )
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = AutoRetry::default();
        assert_eq!(policy.calculate_delay(0), Some(Duration::from_millis(50)));
        assert_eq!(policy.calculate_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.calculate_delay(2), Some(Duration::from_millis(250)));
        assert_eq!(policy.calculate_delay(3), None);
        assert_eq!(policy.max_retries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_retry_grants_connection_refused_until_cap() {
        let policy = AutoRetry::default();
        let request = FetchRequest::get("http://localhost:81/");
        let error = HttpError::from(TransportError::connection_refused("refused"));
        let mut ctx = context();

        for _ in 0..3 {
            assert!(policy.should_retry(&request, &error, &ctx).await);
            ctx.record_retry();
        }
        assert!(!policy.should_retry(&request, &error, &ctx).await);
        assert_eq!(ctx.attempts(), 3);
    }

    #[tokio::test]
    async fn test_auto_retry_rejects_aborts() {
        let policy = AutoRetry::default();
        let request = FetchRequest::get("http://localhost/");
        let error = HttpError::from(TransportError::aborted());
        assert!(!policy.should_retry(&request, &error, &context()).await);
    }

    #[tokio::test]
    async fn test_retry_fn_sees_context() {
        let policy = retry_fn(|_, _, ctx| ctx.attempts() < 1);
        let request = FetchRequest::get("http://localhost/");
        let error = HttpError::Decode("bad".to_string());
        let mut ctx = context();

        assert!(policy.should_retry(&request, &error, &ctx).await);
        ctx.record_retry();
        assert!(!policy.should_retry(&request, &error, &ctx).await);
    }
}
