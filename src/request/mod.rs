//! A single call awaiting batched execution.
//!
//! An [`AsyncRequest`] carries its payload, a completion channel observed
//! through [`ResponseFuture`], a retry counter and a [`Status`]. The batch
//! executor reports outcomes through the request's [`RequestCallback`];
//! `on_failure` is where the retry decision is taken.
//!
//! Every terminal transition goes through one resolution point guarded by
//! the request's state lock, so the outcome is published exactly once.

use crate::error::RequestError;
use crate::retry::{BackOff, RetryPolicy};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Not yet picked up by a transport batch.
    New,
    /// Started by the transport, awaiting an outcome or a retry.
    Pending,
    Completed,
    /// Retries exhausted, non-retryable failure, rejection or interruption.
    Failed,
    /// Service stopped without flushing.
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::New => "NEW",
            Status::Pending => "PENDING",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
            Status::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

type Outcome<T> = Option<Result<T, RequestError>>;

struct State {
    status: Status,
    retries: u32,
    backoff: Option<Box<dyn BackOff>>,
    /// Failure that the policy allowed to be retried; consumed by the retry loop.
    retry_cause: Option<RequestError>,
}

struct Inner<R, T> {
    id: Uuid,
    payload: R,
    retry_policy: Arc<dyn RetryPolicy>,
    state: Mutex<State>,
    outcome: watch::Sender<Outcome<T>>,
    /// Set once the request has been accepted into a batch.
    submitted: AtomicBool,
    interrupted: AtomicBool,
    interrupt: Notify,
}

impl<R, T> Inner<R, T> {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_locked(
        &self,
        state: &mut State,
        status: Status,
        outcome: Result<T, RequestError>,
    ) -> bool {
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        state.retry_cause = None;
        state.backoff = None;
        self.outcome.send_replace(Some(outcome));
        true
    }

    fn resolve(&self, status: Status, outcome: Result<T, RequestError>) -> bool {
        let mut state = self.lock_state();
        self.resolve_locked(&mut state, status, outcome)
    }
}

/// A call submitted through the batch service.
///
/// Cheap to clone; all clones share the same state and outcome. Creating a
/// request does not submit it.
pub struct AsyncRequest<R, T> {
    inner: Arc<Inner<R, T>>,
}

impl<R, T> Clone for AsyncRequest<R, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, T> std::fmt::Debug for AsyncRequest<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("AsyncRequest")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("retries", &state.retries)
            .finish()
    }
}

impl<R, T> AsyncRequest<R, T> {
    pub fn new(payload: R, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                payload,
                retry_policy,
                state: Mutex::new(State {
                    status: Status::New,
                    retries: 0,
                    backoff: None,
                    retry_cause: None,
                }),
                outcome,
                submitted: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                interrupt: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn payload(&self) -> &R {
        &self.inner.payload
    }

    pub fn retry_policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.inner.retry_policy
    }

    /// Completion handle for this request.
    pub fn future(&self) -> ResponseFuture<T> {
        ResponseFuture {
            rx: self.inner.outcome.subscribe(),
        }
    }

    /// Callback the batch executor uses to report this request's outcome.
    pub fn callback(&self) -> RequestCallback<R, T> {
        RequestCallback {
            request: self.clone(),
        }
    }

    pub fn retries(&self) -> u32 {
        self.inner.lock_state().retries
    }

    pub fn status(&self) -> Status {
        self.inner.lock_state().status
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Whether the request has been accepted by a service.
    pub fn is_submitted(&self) -> bool {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    /// Claim the request for a batch. Only the first call succeeds.
    pub(crate) fn mark_submitted(&self) -> bool {
        self.inner
            .submitted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Abort this request's current or next backoff sleep.
    ///
    /// The flag stays set until [`clear_interrupt`](Self::clear_interrupt).
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        self.inner.interrupt.notify_waiters();
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Clear the interrupt flag, returning its previous value.
    pub fn clear_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Resolves once [`interrupt`](Self::interrupt) has been called.
    pub(crate) async fn interrupted(&self) {
        loop {
            let notified = self.inner.interrupt.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }

    /// Still waiting for the transport to report on the current attempt.
    pub(crate) fn awaiting_outcome(&self) -> bool {
        let state = self.inner.lock_state();
        !state.status.is_terminal() && state.retry_cause.is_none()
    }

    pub(crate) fn take_retry_cause(&self) -> Option<RequestError> {
        let mut state = self.inner.lock_state();
        if state.status.is_terminal() {
            return None;
        }
        state.retry_cause.take()
    }

    /// Next delay from this request's backoff, created on first use.
    pub(crate) fn next_backoff(&self) -> Option<Duration> {
        let mut state = self.inner.lock_state();
        let policy = &self.inner.retry_policy;
        state
            .backoff
            .get_or_insert_with(|| policy.backoff_factory().create_backoff())
            .next_backoff()
    }

    pub(crate) fn increment_retries(&self) -> u32 {
        let mut state = self.inner.lock_state();
        state.retries += 1;
        state.retries
    }

    pub(crate) fn fail(&self, error: RequestError) -> bool {
        self.inner.resolve(Status::Failed, Err(error))
    }

    pub(crate) fn cancel(&self) -> bool {
        self.inner
            .resolve(Status::Cancelled, Err(RequestError::Cancelled))
    }
}

/// Outcome hooks wired to the batch executor.
pub struct RequestCallback<R, T> {
    request: AsyncRequest<R, T>,
}

impl<R, T> Clone for RequestCallback<R, T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
        }
    }
}

impl<R, T> RequestCallback<R, T> {
    pub fn request(&self) -> &AsyncRequest<R, T> {
        &self.request
    }

    pub fn payload(&self) -> &R {
        self.request.payload()
    }

    /// The transport started sending this request.
    pub fn on_start(&self) {
        let mut state = self.request.inner.lock_state();
        if state.status == Status::New {
            state.status = Status::Pending;
        }
    }

    pub fn on_success(&self, value: T) {
        self.request.inner.resolve(Status::Completed, Ok(value));
    }

    /// Retry decision point.
    ///
    /// Fails the request unless the status code is retryable and the retry
    /// count is below the policy limit; otherwise records the error for the
    /// dispatcher's retry loop.
    pub fn on_failure(&self, error: RequestError) {
        let inner = &self.request.inner;
        let mut state = inner.lock_state();
        if state.status.is_terminal() {
            return;
        }
        let code = error.status_code();
        let policy = &inner.retry_policy;
        let retry = policy.is_retryable_status_code(code) && state.retries < policy.max_retry_limit();
        if retry {
            debug!(request_id = %inner.id, status_code = code, retries = state.retries, "request failed, eligible for retry");
            state.retry_cause = Some(error);
        } else {
            debug!(request_id = %inner.id, status_code = code, retries = state.retries, "request failed permanently");
            inner.resolve_locked(&mut state, Status::Failed, Err(error));
        }
    }
}

/// Completion handle of an [`AsyncRequest`].
///
/// Any number of handles may observe the same request. Awaiting one yields
/// the success value or the error that ended the request.
pub struct ResponseFuture<T> {
    rx: watch::Receiver<Outcome<T>>,
}

impl<T> Clone for ResponseFuture<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T: Clone> ResponseFuture<T> {
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.rx.borrow(), Some(Err(RequestError::Cancelled)))
    }

    /// The outcome if already resolved.
    pub fn try_get(&self) -> Option<Result<T, RequestError>> {
        self.rx.borrow().clone()
    }

    pub async fn wait(mut self) -> Result<T, RequestError> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(Err(RequestError::Cancelled)),
            // Every handle to the request is gone without a resolution.
            Err(_) => Err(RequestError::Cancelled),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for ResponseFuture<T> {
    type Output = Result<T, RequestError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{DefaultRetryPolicy, FixedBackOff, FixedBackOffFactory};

    fn policy(limit: u32) -> Arc<dyn RetryPolicy> {
        Arc::new(
            DefaultRetryPolicy::new()
                .with_max_retry_limit(limit)
                .with_backoff_factory(Arc::new(FixedBackOffFactory::new(
                    FixedBackOff::new(Duration::from_millis(1)).with_max_attempts(2),
                ))),
        )
    }

    #[tokio::test]
    async fn test_new_request_is_unsubmitted() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        assert_eq!(request.status(), Status::New);
        assert_eq!(request.retries(), 0);
        assert_eq!(*request.payload(), "payload");
        assert!(!request.future().is_done());
        assert!(request.awaiting_outcome());
    }

    #[tokio::test]
    async fn test_start_then_success() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        let future = request.future();
        let callback = request.callback();

        callback.on_start();
        assert_eq!(request.status(), Status::Pending);
        callback.on_success(7);
        assert_eq!(request.status(), Status::Completed);
        assert_eq!(future.await, Ok(7));
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        let callback = request.callback();
        callback.on_success(1);
        callback.on_success(2);
        callback.on_failure(RequestError::remote(503, "unavailable"));
        assert!(!request.cancel());
        callback.on_start();

        assert_eq!(request.status(), Status::Completed);
        assert_eq!(request.future().try_get(), Some(Ok(1)));
    }

    #[tokio::test]
    async fn test_retryable_failure_is_recorded_not_resolved() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        request
            .callback()
            .on_failure(RequestError::remote(503, "unavailable"));

        assert_eq!(request.status(), Status::New);
        assert!(!request.future().is_done());
        assert!(!request.awaiting_outcome());
        assert_eq!(
            request.take_retry_cause(),
            Some(RequestError::remote(503, "unavailable"))
        );
        assert!(request.take_retry_cause().is_none());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_resolves() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        request
            .callback()
            .on_failure(RequestError::remote(403, "forbidden"));

        assert_eq!(request.status(), Status::Failed);
        assert_eq!(request.retries(), 0);
        assert_eq!(
            request.future().await,
            Err(RequestError::remote(403, "forbidden"))
        );
    }

    #[tokio::test]
    async fn test_retry_limit_reached_resolves() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(1));
        request.increment_retries();
        request
            .callback()
            .on_failure(RequestError::remote(503, "unavailable"));
        assert_eq!(request.status(), Status::Failed);
    }

    #[tokio::test]
    async fn test_backoff_is_created_once_per_request() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(5));
        assert_eq!(request.next_backoff(), Some(Duration::from_millis(1)));
        assert_eq!(request.next_backoff(), Some(Duration::from_millis(1)));
        // The same instance keeps counting toward its two-attempt limit.
        assert_eq!(request.next_backoff(), None);
    }

    #[tokio::test]
    async fn test_mark_submitted_once() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        let clone = request.clone();
        assert!(!request.is_submitted());
        assert!(request.mark_submitted());
        assert!(!clone.mark_submitted());
        assert!(clone.is_submitted());
    }

    #[tokio::test]
    async fn test_cancel() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        let future = request.future();
        assert!(request.cancel());
        assert_eq!(request.status(), Status::Cancelled);
        assert!(future.is_cancelled());
        assert_eq!(future.await, Err(RequestError::Cancelled));
    }

    #[tokio::test]
    async fn test_interrupt_flag() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        let waiter = request.clone();
        let handle = tokio::spawn(async move { waiter.interrupted().await });
        tokio::task::yield_now().await;
        request.interrupt();
        handle.await.unwrap();

        assert!(request.is_interrupted());
        // Already set: resolves immediately.
        request.interrupted().await;
        assert!(request.clear_interrupt());
        assert!(!request.is_interrupted());
    }

    #[tokio::test]
    async fn test_future_cancelled_when_request_dropped() {
        let request: AsyncRequest<&str, u32> = AsyncRequest::new("payload", policy(3));
        let future = request.future();
        drop(request);
        assert_eq!(future.await, Err(RequestError::Cancelled));
    }
}
