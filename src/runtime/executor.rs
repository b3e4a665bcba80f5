//! General execution resource for flushes and retry loops.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Unit of work handed to an execution resource.
pub type Task = BoxFuture<'static, ()>;

/// A task could not be accepted by an execution resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task rejected by {executor}: {reason}")]
pub struct RejectedExecution {
    pub executor: String,
    pub reason: String,
}

impl RejectedExecution {
    pub fn new(executor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            executor: executor.into(),
            reason: reason.into(),
        }
    }
}

/// Runs batch flushes and their retry loops.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Accept `task` for execution.
    ///
    /// Returns once the task is handed off; a synchronous implementation may
    /// run it to completion first.
    async fn execute(&self, task: Task) -> Result<(), RejectedExecution>;

    /// Stop accepting tasks; already accepted tasks keep running.
    fn shutdown(&self);

    /// Wait for accepted tasks to finish. Returns `false` on timeout.
    async fn await_termination(&self, timeout: Duration) -> bool;

    /// Stop accepting tasks and abort the ones still running.
    fn shutdown_now(&self);

    fn is_shutdown(&self) -> bool;
}

/// Spawns tasks on the ambient tokio runtime with a bound on outstanding tasks.
pub struct PoolExecutor {
    permits: Arc<Semaphore>,
    capacity: usize,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl PoolExecutor {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of accepted tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }
}

impl Default for PoolExecutor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl TaskExecutor for PoolExecutor {
    async fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        if self.tracker.is_closed() {
            return Err(RejectedExecution::new("pool_executor", "executor is shut down"));
        }
        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            RejectedExecution::new(
                "pool_executor",
                format!("saturated ({} outstanding tasks)", self.capacity),
            )
        })?;
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.tracker.close();
    }

    async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }

    fn shutdown_now(&self) {
        self.tracker.close();
        self.cancel.cancel();
    }

    fn is_shutdown(&self) -> bool {
        self.tracker.is_closed()
    }
}

/// Runs every task to completion inside [`execute`](TaskExecutor::execute).
///
/// Makes dispatch deterministic: a flush has finished, retries included,
/// by the time the call that triggered it returns.
#[derive(Debug, Default)]
pub struct DirectExecutor {
    shut_down: AtomicBool,
}

impl DirectExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskExecutor for DirectExecutor {
    async fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RejectedExecution::new("direct_executor", "executor is shut down"));
        }
        task.await;
        Ok(())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    async fn await_termination(&self, _timeout: Duration) -> bool {
        true
    }

    fn shutdown_now(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
