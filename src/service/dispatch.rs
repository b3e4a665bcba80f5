//! Snapshot dispatch, the retry loop and the auto-flush timer.

use super::flush::FlushHandle;
use super::ServiceState;
use crate::batch::collector::BatchCollector;
use crate::batch::{BatchClient, BatchExecutor, BatchPolicy, BatchSettings};
use crate::error::{Interrupted, RequestError};
use crate::request::{AsyncRequest, Status};
use crate::retry::RetryPolicy;
use crate::runtime::{ExecutorFactory, TaskExecutor, TaskScheduler, TimeProvider};
use crate::stats::BatchStats;
use crate::{Error, ErrorContext, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct Lifecycle {
    pub(crate) state: ServiceState,
    pub(crate) executor: Option<Arc<dyn TaskExecutor>>,
    pub(crate) scheduler: Option<Arc<dyn TaskScheduler>>,
}

pub(crate) struct ServiceInner<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) client: Arc<dyn BatchClient<R, T>>,
    pub(crate) batch_executor: Arc<dyn BatchExecutor<R, T>>,
    pub(crate) executor_factory: Arc<dyn ExecutorFactory>,
    pub(crate) policy: BatchPolicy,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) time: Arc<dyn TimeProvider>,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    /// The single critical section for snapshot-and-dispatch.
    pub(crate) batch: tokio::sync::Mutex<BatchCollector<R, T>>,
    pub(crate) current_size: AtomicUsize,
    /// Snapshots handed to the executor and not yet finished, by flush id.
    pub(crate) in_flight: Mutex<HashMap<u64, Vec<AsyncRequest<R, T>>>>,
    pub(crate) next_flush_id: AtomicU64,
    pub(crate) stats: BatchStats,
    /// Cancelled by a non-flushing stop; pending retries end `CANCELLED`.
    pub(crate) abandon_retries: CancellationToken,
}

impl<R, T> ServiceInner<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ServiceState {
        self.lock_lifecycle().state
    }

    pub(crate) fn ensure_running(&self, operation: &str) -> Result<()> {
        let state = self.state();
        if state == ServiceState::Running {
            return Ok(());
        }
        Err(Error::illegal_state_with_context(
            format!("cannot {} while service is {}", operation, state),
            ErrorContext::new()
                .with_details(format!("expected RUNNING, found {}", state))
                .with_source("batch_service"),
        ))
    }

    fn executor(&self) -> Result<Arc<dyn TaskExecutor>> {
        self.lock_lifecycle().executor.clone().ok_or_else(|| {
            Error::illegal_state_with_context(
                "execution resource not provisioned",
                ErrorContext::new().with_source("batch_service"),
            )
        })
    }

    fn scheduler(&self) -> Result<Arc<dyn TaskScheduler>> {
        self.lock_lifecycle().scheduler.clone().ok_or_else(|| {
            Error::illegal_state_with_context(
                "scheduling resource not provisioned",
                ErrorContext::new().with_source("batch_service"),
            )
        })
    }

    /// Empty the collector. Caller holds the batch lock.
    pub(crate) fn take_snapshot(&self, batch: &mut BatchCollector<R, T>) -> Vec<AsyncRequest<R, T>> {
        let snapshot = batch.take();
        self.current_size.store(0, Ordering::SeqCst);
        snapshot
    }

    fn track(&self, flush_id: u64, requests: Vec<AsyncRequest<R, T>>) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(flush_id, requests);
        }
    }

    fn untrack(&self, flush_id: u64) -> Vec<AsyncRequest<R, T>> {
        self.in_flight
            .lock()
            .ok()
            .and_then(|mut in_flight| in_flight.remove(&flush_id))
            .unwrap_or_default()
    }

    /// Requests of every snapshot still in flight.
    pub(crate) fn drain_in_flight(&self) -> Vec<AsyncRequest<R, T>> {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.drain().flat_map(|(_, reqs)| reqs).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Hand a snapshot to the execution resource.
    ///
    /// A rejection fails every request in the snapshot and is returned to
    /// the caller.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        snapshot: Vec<AsyncRequest<R, T>>,
    ) -> Result<FlushHandle> {
        if snapshot.is_empty() {
            return Ok(FlushHandle::ready(0));
        }
        let executor = self.executor()?;
        let flush_id = self.next_flush_id.fetch_add(1, Ordering::SeqCst);
        let batch_size = snapshot.len();
        self.stats.record_flush();
        self.track(flush_id, snapshot.clone());

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(self);
        let task = Box::pin(async move {
            let completed = inner.run_snapshot(flush_id, &snapshot).await;
            inner.untrack(flush_id);
            let _ = tx.send(completed);
        });

        debug!(flush_id, batch_size, "dispatching batch");
        if let Err(rejected) = executor.execute(task).await {
            let requests = self.untrack(flush_id);
            let cause = RequestError::Rejected(rejected.to_string());
            let failed = requests.iter().filter(|r| r.fail(cause.clone())).count();
            self.stats.record_rejected(requests.len() as u64);
            self.stats.record_failed(failed as u64);
            warn!(flush_id, batch_size, error = %rejected, "batch rejected by execution resource");
            return Err(Error::Rejected(rejected));
        }
        Ok(FlushHandle::pending(flush_id, rx))
    }

    async fn run_snapshot(&self, flush_id: u64, requests: &[AsyncRequest<R, T>]) -> usize {
        let settings = self.policy.batch_settings();
        self.execute_batch(requests, &settings).await;
        join_all(requests.iter().map(|r| self.retry_loop(r, &settings))).await;

        let (mut completed, mut failed, mut cancelled) = (0usize, 0u64, 0u64);
        for request in requests {
            match request.status() {
                Status::Completed => completed += 1,
                Status::Failed => failed += 1,
                Status::Cancelled => cancelled += 1,
                _ => {}
            }
        }
        self.stats.record_completed(completed as u64);
        self.stats.record_failed(failed);
        self.stats.record_cancelled(cancelled);
        debug!(flush_id, batch_size = requests.len(), completed, failed, "flush finished");
        completed
    }

    /// One transport attempt for `requests`.
    ///
    /// Every request ends up either resolved or holding a retry cause.
    async fn execute_batch(&self, requests: &[AsyncRequest<R, T>], settings: &BatchSettings) {
        let mut batch = self.batch_executor.create_batch(settings);
        let mut queued = Vec::with_capacity(requests.len());
        for request in requests {
            if request.is_done() {
                continue;
            }
            match self.batch_executor.queue(&mut batch, request.callback()) {
                Ok(()) => queued.push(request),
                Err(err) => {
                    debug!(request_id = %request.id(), error = %err, "request could not be queued");
                    request.callback().on_failure(err);
                }
            }
        }
        if queued.is_empty() {
            return;
        }

        self.stats.record_batch();
        if let Err(err) = self.batch_executor.execute(batch).await {
            debug!(batch_size = queued.len(), error = %err, "batch execution failed");
            for request in queued.iter().filter(|r| r.awaiting_outcome()) {
                request.callback().on_failure(err.clone());
            }
        }
        for request in queued.iter().filter(|r| r.awaiting_outcome()) {
            request
                .callback()
                .on_failure(RequestError::transport("no response received for request"));
        }
    }

    async fn retry_loop(&self, request: &AsyncRequest<R, T>, settings: &BatchSettings) {
        while let Some(cause) = request.take_retry_cause() {
            if self.abandon_retries.is_cancelled() {
                self.cancel_retry(request);
                return;
            }
            let Some(delay) = request.next_backoff() else {
                warn!(
                    request_id = %request.id(),
                    retries = request.retries(),
                    status_code = cause.status_code(),
                    "backoff exhausted"
                );
                request.fail(cause);
                return;
            };

            debug!(
                request_id = %request.id(),
                retries = request.retries(),
                status_code = cause.status_code(),
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            let slept = tokio::select! {
                result = self.batch_executor.sleep(delay) => result,
                _ = request.interrupted() => Err(Interrupted),
                _ = self.abandon_retries.cancelled() => Ok(()),
            };
            if slept.is_err() {
                request.interrupt();
                warn!(request_id = %request.id(), retries = request.retries(), "retry interrupted");
                request.fail(RequestError::Interrupted);
                return;
            }

            if self.abandon_retries.is_cancelled() {
                self.cancel_retry(request);
                return;
            }

            request.increment_retries();
            self.stats.record_retry();
            self.execute_batch(std::slice::from_ref(request), settings)
                .await;
        }
    }

    fn cancel_retry(&self, request: &AsyncRequest<R, T>) {
        if request.cancel() {
            debug!(request_id = %request.id(), retries = request.retries(), "retry abandoned by shutdown");
        }
    }

    /// Arm the auto-flush timer for batch `generation`.
    pub(crate) fn arm_timer(self: &Arc<Self>, generation: u64, delay: Duration) -> Result<()> {
        let scheduler = self.scheduler()?;
        let weak = Arc::downgrade(self);
        scheduler.schedule(
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timer(generation).await;
                }
            }),
            delay,
        )?;
        Ok(())
    }

    async fn on_timer(self: &Arc<Self>, generation: u64) {
        let Some(max_delay) = self.policy.max_batch_delay() else {
            return;
        };
        let mut batch = self.batch.lock().await;
        if self.state() != ServiceState::Running
            || batch.generation() != generation
            || batch.is_empty()
        {
            return;
        }

        let max_ms = max_delay.as_millis() as u64;
        let age_ms = batch
            .age_ms(self.time.current_time_millis())
            .unwrap_or(0);
        if age_ms < max_ms {
            let remaining = Duration::from_millis(max_ms - age_ms);
            if let Err(err) = self.arm_timer(generation, remaining) {
                warn!(error = %err, "failed to re-arm auto-flush timer");
            }
            return;
        }

        let snapshot = self.take_snapshot(&mut batch);
        debug!(batch_size = snapshot.len(), age_ms, "batch delay elapsed");
        if let Err(err) = self.dispatch(snapshot).await {
            warn!(error = %err, "timed flush failed");
        }
    }
}
