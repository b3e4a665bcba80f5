//! Execution resources and clocks used by the batch service.
//!
//! The service never reaches for process-wide defaults: both execution
//! resources come from an [`ExecutorFactory`] supplied at build time, and the
//! clock from a [`TimeProvider`]. Tests substitute [`DirectExecutor`],
//! [`ManualScheduler`] and [`ManualTimeProvider`].

mod executor;
mod scheduler;
mod time;

pub use executor::{DirectExecutor, PoolExecutor, RejectedExecution, Task, TaskExecutor};
pub use scheduler::{ManualScheduler, TaskScheduler, TokioScheduler};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};

use std::sync::Arc;

/// Provisions the two execution resources when the service starts.
pub trait ExecutorFactory: Send + Sync {
    /// Resource running batch construction, execution and retry loops.
    fn executor(&self) -> Arc<dyn TaskExecutor>;

    /// Resource firing timed auto-flush.
    fn scheduler(&self) -> Arc<dyn TaskScheduler>;
}

/// [`PoolExecutor`] plus [`TokioScheduler`].
#[derive(Debug, Clone)]
pub struct DefaultExecutorFactory {
    capacity: usize,
}

impl DefaultExecutorFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DefaultExecutorFactory {
    fn default() -> Self {
        Self::new(PoolExecutor::DEFAULT_CAPACITY)
    }
}

impl ExecutorFactory for DefaultExecutorFactory {
    fn executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::new(PoolExecutor::new(self.capacity))
    }

    fn scheduler(&self) -> Arc<dyn TaskScheduler> {
        Arc::new(TokioScheduler::new())
    }
}

/// Hands out pre-built resources; each call returns the same instances.
#[derive(Clone)]
pub struct FixedExecutorFactory {
    executor: Arc<dyn TaskExecutor>,
    scheduler: Arc<dyn TaskScheduler>,
}

impl FixedExecutorFactory {
    pub fn new(executor: Arc<dyn TaskExecutor>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            executor,
            scheduler,
        }
    }

    /// [`DirectExecutor`] with a [`ManualScheduler`]: fully deterministic dispatch.
    pub fn direct() -> (Self, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let factory = Self::new(
            Arc::new(DirectExecutor::new()),
            Arc::clone(&scheduler) as Arc<dyn TaskScheduler>,
        );
        (factory, scheduler)
    }
}

impl ExecutorFactory for FixedExecutorFactory {
    fn executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::clone(&self.executor)
    }

    fn scheduler(&self) -> Arc<dyn TaskScheduler> {
        Arc::clone(&self.scheduler)
    }
}
