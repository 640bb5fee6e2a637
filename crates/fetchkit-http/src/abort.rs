//! Cancellation tokens and per-attempt timeout binding

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::{config::FetchOptions, types::FetchRequest};

/// Read side of an [`AbortController`], attached to the request on the wire
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub fn aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the owning controller aborts
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Cancellation token for one attempt
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }
}

/// Produces a fresh controller; may be called once per attempt
pub type AbortControllerFactory = Arc<dyn Fn() -> AbortController + Send + Sync>;

/// Constructor that builds plain [`AbortController`]s
pub fn default_abort_controller() -> AbortControllerFactory {
    Arc::new(AbortController::new)
}

/// Scheduled abort for an attempt. Clearing or dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    fn schedule(controller: AbortController, timeout: Duration) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!("Request timed out after {:?}, aborting", timeout);
            controller.abort();
        });
        Self { task }
    }

    pub fn clear(self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What [`add_timeout`] bound to an attempt
#[derive(Debug, Default)]
pub struct AttemptBinding {
    pub timer: Option<TimerHandle>,
    pub abort_controller: Option<AbortController>,
}

impl AttemptBinding {
    pub fn clear_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.clear();
        }
    }
}

/// Attach a fresh abort signal, and optionally a deadline, to `request`
///
/// The per-call factory wins over the configured constructor. With neither
/// available nothing is bound and the attempt cannot be cancelled. A zero
/// timeout means no deadline.
pub fn add_timeout(
    request: &mut FetchRequest,
    options: Option<&FetchOptions>,
    abort_controller: Option<&AbortControllerFactory>,
    timeout: Option<Duration>,
) -> AttemptBinding {
    let factory = options
        .and_then(|options| options.abort_controller_factory.as_ref())
        .or(abort_controller);
    let Some(factory) = factory else {
        return AttemptBinding::default();
    };

    let controller = factory();
    let timer = timeout
        .filter(|timeout| !timeout.is_zero())
        .map(|timeout| TimerHandle::schedule(controller.clone(), timeout));
    request.signal = Some(controller.signal());

    AttemptBinding {
        timer,
        abort_controller: Some(controller),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_binds_nothing_without_constructor_or_factory() {
        let mut request = FetchRequest::get("http://example.com");
        let binding = add_timeout(&mut request, None, None, Some(Duration::from_millis(5)));
        assert!(binding.timer.is_none());
        assert!(binding.abort_controller.is_none());
        assert!(request.signal.is_none());
    }

    #[tokio::test]
    async fn test_controller_signal_shares_state() {
        let mut request = FetchRequest::get("http://example.com");
        let ctor = default_abort_controller();
        let binding = add_timeout(&mut request, None, Some(&ctor), None);

        let controller = binding.abort_controller.unwrap();
        let signal = request.signal.unwrap();
        assert!(binding.timer.is_none());
        assert!(!signal.aborted());
        controller.abort();
        assert!(signal.aborted());
        assert!(controller.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_the_signal() {
        let mut request = FetchRequest::get("http://example.com");
        let ctor = default_abort_controller();
        let _binding = add_timeout(&mut request, None, Some(&ctor), Some(Duration::from_millis(10)));
        let signal = request.signal.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(signal.aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_timer_never_fires() {
        let mut request = FetchRequest::get("http://example.com");
        let ctor = default_abort_controller();
        let mut binding =
            add_timeout(&mut request, None, Some(&ctor), Some(Duration::from_millis(10)));
        binding.clear_timer();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!request.signal.unwrap().aborted());
    }

    #[tokio::test]
    async fn test_factory_called_per_binding() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let options = FetchOptions::new().with_abort_controller_factory(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            AbortController::new()
        }));

        let ctor = default_abort_controller();
        for _ in 0..2 {
            let mut request = FetchRequest::get("http://example.com");
            let binding = add_timeout(&mut request, Some(&options), Some(&ctor), None);
            assert!(binding.abort_controller.is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
