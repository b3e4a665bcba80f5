//! The batching dispatcher.
//!
//! [`BatchRequestService`] collects [`AsyncRequest`]s into a pending batch
//! and flushes it when the batch reaches `max_batch_size`, when
//! `max_batch_delay` has elapsed since its first request, on an explicit
//! [`flush`](BatchRequestService::flush), or at shutdown. Each flush snapshot
//! is executed on the execution resource, followed by a retry loop per
//! request driven by the request's [`RetryPolicy`].
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use batch_request_service::batch::{BatchClient, BatchSettings};
//! use batch_request_service::{BatchRequestService, RequestError};
//! use std::sync::Arc;
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl BatchClient<String, String> for Upper {
//!     async fn send_batch(
//!         &self,
//!         requests: &[&String],
//!         _settings: &BatchSettings,
//!     ) -> Result<Vec<Result<String, RequestError>>, RequestError> {
//!         Ok(requests.iter().map(|s| Ok(s.to_uppercase())).collect())
//!     }
//! }
//!
//! # async fn run() -> batch_request_service::Result<()> {
//! let service = BatchRequestService::<String, String>::builder()
//!     .with_client(Arc::new(Upper))
//!     .build()?;
//! service.start()?;
//! let response = service.submit("hello".to_string()).await?;
//! service.flush().await?.await?;
//! assert_eq!(response.await.unwrap(), "HELLO");
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod dispatch;
mod flush;

pub use builder::BatchRequestServiceBuilder;
pub use flush::FlushHandle;

use crate::batch::{BatchClient, BatchPolicy};
use crate::error::RequestError;
use crate::request::{AsyncRequest, ResponseFuture, Status};
use crate::retry::RetryPolicy;
use crate::runtime::{TaskExecutor, TaskScheduler};
use crate::stats::BatchStatsSnapshot;
use crate::{Error, ErrorContext, Result};
use dispatch::ServiceInner;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of a [`BatchRequestService`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::New => "NEW",
            ServiceState::Starting => "STARTING",
            ServiceState::Running => "RUNNING",
            ServiceState::Stopping => "STOPPING",
            ServiceState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Client-side batching dispatcher. Cheap to clone; clones share one service.
pub struct BatchRequestService<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    inner: Arc<ServiceInner<R, T>>,
}

impl<R, T> Clone for BatchRequestService<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, T> BatchRequestService<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn builder() -> BatchRequestServiceBuilder<R, T> {
        BatchRequestServiceBuilder::new()
    }

    /// Provision the execution resources and start accepting requests.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lock_lifecycle();
        if lifecycle.state != ServiceState::New {
            return Err(Error::illegal_state_with_context(
                format!("cannot start service in state {}", lifecycle.state),
                ErrorContext::new()
                    .with_details("start may only be called once")
                    .with_source("batch_service"),
            ));
        }
        lifecycle.state = ServiceState::Starting;
        lifecycle.executor = Some(self.inner.executor_factory.executor());
        lifecycle.scheduler = Some(self.inner.executor_factory.scheduler());
        lifecycle.state = ServiceState::Running;
        info!(
            max_batch_size = self.inner.policy.max_batch_size(),
            max_batch_delay_ms = self.inner.policy.max_batch_delay().map(|d| d.as_millis() as u64),
            flush_on_shutdown = self.inner.policy.flush_on_shutdown(),
            "batch request service started"
        );
        Ok(())
    }

    /// Queue `request` into the current batch.
    ///
    /// When the batch reaches `max_batch_size` it is snapshotted and handed to
    /// the execution resource before this returns; a rejection is returned
    /// here and fails every request in that snapshot. A request can be added
    /// once; adding it again is an illegal-state error.
    pub async fn add(&self, request: &AsyncRequest<R, T>) -> Result<()> {
        self.inner.ensure_running("add request")?;
        if request.is_done() {
            return Err(Error::illegal_state_with_context(
                format!("request {} is already {}", request.id(), request.status()),
                ErrorContext::new().with_source("batch_service"),
            ));
        }

        let mut batch = self.inner.batch.lock().await;
        // A concurrent stop may have drained the batch while we waited.
        self.inner.ensure_running("add request")?;
        if request.status() != Status::New || !request.mark_submitted() {
            return Err(Error::illegal_state_with_context(
                format!("request {} is already queued or in flight", request.id()),
                ErrorContext::new()
                    .with_details(format!("status {}", request.status()))
                    .with_source("batch_service"),
            ));
        }

        if batch.is_empty() {
            if let Some(delay) = self.inner.policy.max_batch_delay() {
                if let Err(err) = self.inner.arm_timer(batch.generation(), delay) {
                    request.fail(RequestError::Rejected(err.to_string()));
                    self.inner.stats.record_rejected(1);
                    self.inner.stats.record_failed(1);
                    warn!(request_id = %request.id(), error = %err, "auto-flush timer rejected");
                    return Err(err);
                }
            }
        }
        let now = self.inner.time.current_time_millis();
        let added = batch.add(request.clone(), now);
        self.inner.current_size.store(batch.len(), Ordering::SeqCst);
        if added.opened() {
            debug!(request_id = %request.id(), "opened new batch");
        }

        if added.should_flush() {
            let snapshot = self.inner.take_snapshot(&mut batch);
            debug!(batch_size = added.count(), "max batch size reached");
            self.inner.dispatch(snapshot).await?;
        }
        Ok(())
    }

    /// Create a request for `payload` with the service's retry policy and add it.
    pub async fn submit(&self, payload: R) -> Result<ResponseFuture<T>> {
        let request = self.new_request(payload);
        self.add(&request).await?;
        Ok(request.future())
    }

    pub fn new_request(&self, payload: R) -> AsyncRequest<R, T> {
        AsyncRequest::new(payload, Arc::clone(&self.inner.retry_policy))
    }

    /// Snapshot the current batch and hand it to the execution resource.
    ///
    /// Requests added after the snapshot stay queued for a later flush.
    pub async fn flush(&self) -> Result<FlushHandle> {
        self.inner.ensure_running("flush")?;
        let mut batch = self.inner.batch.lock().await;
        let snapshot = self.inner.take_snapshot(&mut batch);
        self.inner.dispatch(snapshot).await
    }

    /// Stop accepting requests, flush or cancel what is pending, then shut
    /// down both execution resources.
    ///
    /// Calling `stop` on a stopping or terminated service is a no-op; a
    /// service that was never started terminates directly.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut lifecycle = self.inner.lock_lifecycle();
            match lifecycle.state {
                ServiceState::New => {
                    lifecycle.state = ServiceState::Terminated;
                    info!("batch request service terminated before start");
                    return Ok(());
                }
                ServiceState::Running => {
                    lifecycle.state = ServiceState::Stopping;
                    if !self.inner.policy.flush_on_shutdown() {
                        self.inner.abandon_retries.cancel();
                    }
                }
                state => {
                    debug!(state = %state, "stop called on stopped service");
                    return Ok(());
                }
            }
        }
        info!("stopping batch request service");

        let remaining = {
            let mut batch = self.inner.batch.lock().await;
            self.inner.take_snapshot(&mut batch)
        };
        if self.inner.policy.flush_on_shutdown() {
            match self.inner.dispatch(remaining).await {
                Ok(handle) => match handle.await {
                    Ok(completed) => debug!(completed, "final flush finished"),
                    Err(err) => warn!(error = %err, "final flush did not finish"),
                },
                Err(err) => warn!(error = %err, "final flush rejected"),
            }
        } else {
            let cancelled = remaining.iter().filter(|r| r.cancel()).count();
            self.inner.stats.record_cancelled(cancelled as u64);
            if cancelled > 0 {
                info!(cancelled, "cancelled pending requests");
            }
        }

        let (executor, scheduler) = {
            let mut lifecycle = self.inner.lock_lifecycle();
            (lifecycle.executor.take(), lifecycle.scheduler.take())
        };
        let timeout = self.inner.policy.shutdown_timeout();
        if let Some(executor) = executor {
            shutdown_executor(executor.as_ref(), timeout).await;
        }
        if let Some(scheduler) = scheduler {
            shutdown_scheduler(scheduler.as_ref(), timeout).await;
        }

        let leftovers = self.inner.drain_in_flight();
        let cancelled = leftovers.iter().filter(|r| r.cancel()).count();
        if cancelled > 0 {
            self.inner.stats.record_cancelled(cancelled as u64);
            warn!(cancelled, "cancelled requests of aborted flushes");
        }

        self.inner.lock_lifecycle().state = ServiceState::Terminated;
        info!("batch request service terminated");
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Requests in the active batch, not yet flushed.
    pub fn current_batch_size(&self) -> usize {
        self.inner.current_size.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BatchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn batch_policy(&self) -> &BatchPolicy {
        &self.inner.policy
    }

    pub fn retry_policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.inner.retry_policy
    }

    pub fn client(&self) -> &Arc<dyn BatchClient<R, T>> {
        &self.inner.client
    }
}

async fn shutdown_executor(executor: &dyn TaskExecutor, timeout: Duration) {
    executor.shutdown();
    if !executor.await_termination(timeout).await {
        warn!(timeout_ms = timeout.as_millis() as u64, "executor did not terminate, forcing shutdown");
        executor.shutdown_now();
    }
}

async fn shutdown_scheduler(scheduler: &dyn TaskScheduler, timeout: Duration) {
    scheduler.shutdown();
    if !scheduler.await_termination(timeout).await {
        warn!(timeout_ms = timeout.as_millis() as u64, "scheduler did not terminate, forcing shutdown");
        scheduler.shutdown_now();
    }
}
