//! Scheduling resource for timed auto-flush.

use super::executor::{RejectedExecution, Task};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Runs tasks after a delay.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    fn schedule(&self, task: Task, delay: Duration) -> Result<(), RejectedExecution>;

    /// Stop accepting tasks and drop timers that have not fired yet.
    fn shutdown(&self);

    /// Wait for fired tasks to finish. Returns `false` on timeout.
    async fn await_termination(&self, timeout: Duration) -> bool;

    /// Like [`shutdown`](TaskScheduler::shutdown), also aborting fired tasks.
    fn shutdown_now(&self);
}

/// Timer tasks on the ambient tokio runtime.
pub struct TokioScheduler {
    tracker: TaskTracker,
    pending_timers: CancellationToken,
    running: CancellationToken,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            pending_timers: CancellationToken::new(),
            running: CancellationToken::new(),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskScheduler for TokioScheduler {
    fn schedule(&self, task: Task, delay: Duration) -> Result<(), RejectedExecution> {
        if self.tracker.is_closed() {
            return Err(RejectedExecution::new("tokio_scheduler", "scheduler is shut down"));
        }
        let pending = self.pending_timers.clone();
        let running = self.running.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = pending.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            tokio::select! {
                _ = running.cancelled() => {}
                _ = task => {}
            }
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.tracker.close();
        self.pending_timers.cancel();
    }

    async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }

    fn shutdown_now(&self) {
        self.shutdown();
        self.running.cancel();
    }
}

/// Records scheduled tasks instead of running them; tests fire them by hand.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    tasks: Vec<(Duration, Task)>,
    delays: Vec<Duration>,
    shutdown_calls: usize,
    shutdown_now_calls: usize,
    closed: bool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay passed to `schedule`, in call order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|s| s.delays.clone())
            .unwrap_or_default()
    }

    /// Number of scheduled tasks not yet fired.
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.tasks.len()).unwrap_or(0)
    }

    /// Remove and run the oldest scheduled task. Returns `false` if none was pending.
    pub async fn fire_next(&self) -> bool {
        let next = match self.state.lock() {
            Ok(mut s) if !s.tasks.is_empty() => Some(s.tasks.remove(0)),
            _ => None,
        };
        match next {
            Some((_, task)) => {
                task.await;
                true
            }
            None => false,
        }
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state.lock().map(|s| s.shutdown_calls).unwrap_or(0)
    }

    pub fn shutdown_now_calls(&self) -> usize {
        self.state.lock().map(|s| s.shutdown_now_calls).unwrap_or(0)
    }
}

#[async_trait]
impl TaskScheduler for ManualScheduler {
    fn schedule(&self, task: Task, delay: Duration) -> Result<(), RejectedExecution> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RejectedExecution::new("manual_scheduler", "state poisoned"))?;
        if state.closed {
            return Err(RejectedExecution::new("manual_scheduler", "scheduler is shut down"));
        }
        state.delays.push(delay);
        state.tasks.push((delay, task));
        Ok(())
    }

    fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.shutdown_calls += 1;
        }
    }

    async fn await_termination(&self, _timeout: Duration) -> bool {
        true
    }

    fn shutdown_now(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.tasks.clear();
            state.shutdown_now_calls += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        scheduler
            .schedule(
                Box::pin(async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_secs(10),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_shutdown_drops_pending_timers() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        scheduler
            .schedule(
                Box::pin(async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_secs(10),
            )
            .unwrap();

        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(1)).await);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler
            .schedule(Box::pin(async {}), Duration::ZERO)
            .is_err());
    }

    #[tokio::test]
    async fn test_manual_scheduler_records_and_fires() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        scheduler
            .schedule(
                Box::pin(async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_secs(10),
            )
            .unwrap();

        assert_eq!(scheduler.scheduled_delays(), vec![Duration::from_secs(10)]);
        assert_eq!(scheduler.pending(), 1);
        assert!(scheduler.fire_next().await);
        assert!(!scheduler.fire_next().await);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        scheduler.shutdown();
        scheduler.shutdown_now();
        assert_eq!(scheduler.shutdown_calls(), 1);
        assert_eq!(scheduler.shutdown_now_calls(), 1);
    }
}
