//! Request execution pipeline
//!
//! [`fetch_helper`] drives one logical call: request interceptors, then a
//! sequence of attempts, each with its own cancellation token and timer,
//! until a response is classified as a success, an expected error, or a
//! terminal failure.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    abort::{add_timeout, AbortController},
    config::{FetchConfig, FetchOptions},
    error::{CallSite, FetchError, HttpError, Result},
    middleware::{AutoRetry, HttpInterceptor, RetryContext, RetryPolicy},
    types::{
        is_success_status, CallSource, FetchRequest, FetchResponse, ResponseBody, ResponseType,
        TransportResponse,
    },
};

#[derive(Debug, Default)]
struct CallState {
    /// Whether attempts get a token at all
    cancellable: bool,
    aborted: AtomicBool,
    active: Mutex<Option<AbortController>>,
    expects: Mutex<Vec<u16>>,
}

/// Control surface of a running call, detachable from its [`FetchHandle`]
#[derive(Debug, Clone, Default)]
pub struct CallController {
    inner: Arc<CallState>,
}

impl CallController {
    fn new(expects: Vec<u16>, cancellable: bool) -> Self {
        Self {
            inner: Arc::new(CallState {
                cancellable,
                expects: Mutex::new(expects),
                ..Default::default()
            }),
        }
    }

    /// Abort the in-flight attempt. Attempts bound later start out aborted.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        if let Some(controller) = self.inner.active.lock().as_ref() {
            controller.abort();
        }
    }

    /// The active token's flag. Before the first attempt this is the pending
    /// abort; a call that never gets a token always reports `false`.
    pub fn is_aborted(&self) -> bool {
        match self.inner.active.lock().as_ref() {
            Some(controller) => controller.is_aborted(),
            None => self.inner.cancellable && self.inner.aborted.load(Ordering::SeqCst),
        }
    }

    /// Extend the allow-list of statuses that resolve instead of failing
    pub fn expect(&self, codes: impl IntoIterator<Item = u16>) {
        self.inner.expects.lock().extend(codes);
    }

    fn expects(&self, status: u16) -> bool {
        self.inner.expects.lock().contains(&status)
    }

    fn bind(&self, controller: Option<AbortController>) {
        let mut active = self.inner.active.lock();
        if let Some(controller) = &controller {
            if self.inner.aborted.load(Ordering::SeqCst) {
                controller.abort();
            }
        }
        if controller.is_some() {
            *active = controller;
        }
    }
}

/// Pending result of [`fetch_helper`]
///
/// Nothing is sent until the handle is first polled.
pub struct FetchHandle {
    future: BoxFuture<'static, std::result::Result<FetchResponse, FetchError>>,
    controller: CallController,
}

impl FetchHandle {
    pub fn abort(&self) {
        self.controller.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.controller.is_aborted()
    }

    #[deprecated(note = "pass the statuses through `FetchOptions::with_expect`")]
    pub fn expect(self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.controller.expect(codes);
        self
    }

    pub fn controller(&self) -> CallController {
        self.controller.clone()
    }
}

impl Future for FetchHandle {
    type Output = std::result::Result<FetchResponse, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

/// Issue `request` through the configured transport
///
/// The call site is captured here, so a terminal [`FetchError`] points at
/// the caller rather than at the attempt that failed last.
#[track_caller]
pub fn fetch_helper(
    config: &FetchConfig,
    request: FetchRequest,
    options: Option<FetchOptions>,
    source: Option<CallSource>,
) -> FetchHandle {
    let call_site = CallSite::capture();
    let options = options.unwrap_or_default();
    let cancellable =
        options.abort_controller_factory.is_some() || config.abort_controller.is_some();
    let controller = CallController::new(options.expect.clone(), cancellable);
    let call = Call {
        config: Arc::new(config.clone()),
        options: Arc::new(options),
        source,
        controller: controller.clone(),
        call_site,
    };
    FetchHandle {
        future: call.run(request).boxed(),
        controller,
    }
}

/// How an attempt failed
enum Failure {
    /// Goes through the allow-list and the retry policy
    Attempt(HttpError),
    /// Ends the call immediately
    Fatal(HttpError),
}

struct Call {
    config: Arc<FetchConfig>,
    options: Arc<FetchOptions>,
    source: Option<CallSource>,
    controller: CallController,
    call_site: CallSite,
}

impl Call {
    fn interceptors(&self) -> impl Iterator<Item = &Arc<dyn HttpInterceptor>> {
        self.config
            .interceptors
            .iter()
            .chain(self.options.interceptors.iter())
    }

    fn policy(&self) -> Arc<dyn RetryPolicy> {
        self.options
            .should_retry
            .clone()
            .or_else(|| self.config.should_retry.clone())
            .unwrap_or_else(|| Arc::new(AutoRetry::default()))
    }

    async fn run(self, mut request: FetchRequest) -> std::result::Result<FetchResponse, FetchError> {
        for interceptor in self.interceptors() {
            if let Err(err) = interceptor.on_request(&mut request, self.source.as_ref()).await {
                return Err(self.fail(err, 0));
            }
        }

        let mut context = RetryContext::new(self.config.clone(), self.options.clone());
        loop {
            let error = match self.attempt(&request).await {
                Ok(response) => return Ok(response),
                Err(Failure::Fatal(err)) => return Err(self.fail(err, context.attempts())),
                Err(Failure::Attempt(err)) => err,
            };

            if let Some(status) = error.status() {
                if self.controller.expects(status) {
                    debug!("Status {} is expected, resolving", status);
                    return Ok(expected_response(&request, error));
                }
            }

            if !self.policy().should_retry(&request, &error, &context).await {
                return Err(self.fail(error, context.attempts()));
            }
            if let Some(on_retry) = &self.options.on_retry {
                on_retry(&request, &error);
            }
            if let Some(on_retry) = &self.config.on_retry {
                on_retry(&request, &error);
            }
            context.record_retry();
            warn!(
                "Retrying {} {} (attempt {}): {}",
                request.method,
                request.url,
                context.attempts(),
                error
            );
        }
    }

    async fn attempt(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, Failure> {
        let mut wire = request.clone();
        let mut binding = add_timeout(
            &mut wire,
            Some(&self.options),
            self.config.abort_controller.as_ref(),
            self.options.timeout.or(self.config.timeout),
        );
        self.controller.bind(binding.abort_controller.clone());

        debug!("HTTP {}: {}", wire.method, wire.url);
        let response = self.config.transport.fetch(&request.url, wire).await;
        binding.clear_timer();
        let response = response.map_err(Failure::Attempt)?;

        let mut result = FetchResponse {
            request: request.clone(),
            status: response.status,
            status_code: response.status,
            headers: response.headers.clone(),
            body: decode_body(&response).map_err(Failure::Attempt)?,
            response_type: ResponseType::Response,
            err_obj: None,
            response: None,
        };
        for interceptor in self.interceptors() {
            interceptor
                .on_response(&response, request, self.source.as_ref(), &mut result)
                .await
                .map_err(Failure::Fatal)?;
        }

        if !self.options.no_http_exceptions && !is_success_status(result.status) {
            let message = result
                .body
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| result.status.to_string());
            return Err(Failure::Attempt(HttpError::HttpStatus {
                status: result.status,
                message,
                response: Box::new(result),
            }));
        }
        Ok(result)
    }

    fn fail(&self, error: HttpError, retried: u32) -> FetchError {
        debug!("Request failed after {} retries: {}", retried, error);
        FetchError::new(error, retried, self.call_site.clone())
    }
}

/// Decode by content type: JSON when declared, raw bytes otherwise
fn decode_body(response: &TransportResponse) -> Result<ResponseBody> {
    let is_json = response
        .content_type()
        .is_some_and(|content_type| content_type.contains("application/json"));
    if !is_json {
        return Ok(ResponseBody::Blob(response.body.clone()));
    }
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ResponseBody::Json(Value::Null));
    }
    serde_json::from_slice(&response.body)
        .map(ResponseBody::Json)
        .map_err(|e| HttpError::Decode(e.to_string()))
}

/// Reshape an allow-listed status error into a resolved response
fn expected_response(request: &FetchRequest, error: HttpError) -> FetchResponse {
    let original = error.response().cloned();
    let status = error.status().unwrap_or_default();
    let (headers, body) = match &original {
        Some(original) => (original.headers.clone(), original.body.clone()),
        None => (Default::default(), ResponseBody::Json(Value::Null)),
    };
    FetchResponse {
        request: request.clone(),
        status,
        status_code: status,
        headers,
        body,
        response_type: ResponseType::Response,
        err_obj: Some(Arc::new(error)),
        response: original.map(Box::new),
    }
}
