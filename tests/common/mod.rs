#![allow(dead_code)]

use async_trait::async_trait;
use batch_request_service::batch::{Batch, BatchClient, BatchExecutor, BatchPolicy, BatchSettings};
use batch_request_service::request::RequestCallback;
use batch_request_service::retry::{BackOffFactory, DefaultRetryPolicy, FixedBackOff, FixedBackOffFactory, RetryPolicy};
use batch_request_service::runtime::{
    DirectExecutor, FixedExecutorFactory, ManualScheduler, ManualTimeProvider, RejectedExecution,
    Task, TaskExecutor, TaskScheduler, TimeProvider,
};
use batch_request_service::{BatchRequestService, Interrupted, RequestError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Service = BatchRequestService<u32, u32>;

/// What the scripted transport does with one request on one attempt.
#[derive(Debug, Clone)]
pub enum Reply {
    Success(u32),
    Failure(RequestError),
    /// No callback at all.
    Silent,
}

type Handler = Box<dyn Fn(u32, usize) -> Reply + Send + Sync>;

/// Batch executor driven by a `(payload, attempt) -> Reply` script.
pub struct ScriptedExecutor {
    handler: Handler,
    attempts: Mutex<HashMap<u32, usize>>,
    executed: Mutex<Vec<Vec<u32>>>,
    sleeps: Mutex<Vec<Duration>>,
    batch_error: Mutex<Option<RequestError>>,
    queue_rejects: Mutex<HashSet<u32>>,
    interrupt_sleeps: AtomicBool,
}

impl ScriptedExecutor {
    pub fn new(handler: impl Fn(u32, usize) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            attempts: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            sleeps: Mutex::new(Vec::new()),
            batch_error: Mutex::new(None),
            queue_rejects: Mutex::new(HashSet::new()),
            interrupt_sleeps: AtomicBool::new(false),
        })
    }

    /// Every request succeeds with `payload * 10`.
    pub fn succeeding() -> Arc<Self> {
        Self::new(|payload, _| Reply::Success(payload * 10))
    }

    /// Every attempt fails with `code`.
    pub fn failing(code: u16) -> Arc<Self> {
        Self::new(move |_, _| Reply::Failure(RequestError::remote(code, "scripted failure")))
    }

    /// Fails with `code` for the first `failures` attempts of each request, then succeeds.
    pub fn failing_then_succeeding(code: u16, failures: usize) -> Arc<Self> {
        Self::new(move |payload, attempt| {
            if attempt < failures {
                Reply::Failure(RequestError::remote(code, "scripted failure"))
            } else {
                Reply::Success(payload * 10)
            }
        })
    }

    /// Payloads of each executed batch, in call order.
    pub fn executed(&self) -> Vec<Vec<u32>> {
        self.executed.lock().unwrap().clone()
    }

    pub fn execute_calls(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    /// The next `execute` fails as a whole with `error`, firing no callbacks.
    pub fn fail_next_batch(&self, error: RequestError) {
        *self.batch_error.lock().unwrap() = Some(error);
    }

    pub fn reject_queue(&self, payload: u32) {
        self.queue_rejects.lock().unwrap().insert(payload);
    }

    pub fn interrupt_sleeps(&self) {
        self.interrupt_sleeps.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BatchExecutor<u32, u32> for ScriptedExecutor {
    fn queue(
        &self,
        batch: &mut Batch<u32, u32>,
        callback: RequestCallback<u32, u32>,
    ) -> Result<(), RequestError> {
        if self.queue_rejects.lock().unwrap().contains(callback.payload()) {
            return Err(RequestError::transport("queue refused"));
        }
        batch.push(callback);
        Ok(())
    }

    async fn execute(&self, batch: Batch<u32, u32>) -> Result<(), RequestError> {
        let entries = batch.into_entries();
        self.executed
            .lock()
            .unwrap()
            .push(entries.iter().map(|e| *e.payload()).collect());
        if let Some(err) = self.batch_error.lock().unwrap().take() {
            return Err(err);
        }
        for entry in &entries {
            entry.on_start();
            let payload = *entry.payload();
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(payload).or_insert(0);
                *n += 1;
                *n - 1
            };
            match (self.handler)(payload, attempt) {
                Reply::Success(value) => entry.on_success(value),
                Reply::Failure(err) => entry.on_failure(err),
                Reply::Silent => {}
            }
        }
        Ok(())
    }

    async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.sleeps.lock().unwrap().push(duration);
        if self.interrupt_sleeps.load(Ordering::SeqCst) {
            return Err(Interrupted);
        }
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Retry policy that counts how often it is consulted.
pub struct CountingRetryPolicy {
    inner: DefaultRetryPolicy,
    retryable_checks: Mutex<Vec<u16>>,
}

impl CountingRetryPolicy {
    pub fn new(inner: DefaultRetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            inner,
            retryable_checks: Mutex::new(Vec::new()),
        })
    }

    /// Status codes passed to `is_retryable_status_code`, in order.
    pub fn checked_codes(&self) -> Vec<u16> {
        self.retryable_checks.lock().unwrap().clone()
    }
}

impl RetryPolicy for CountingRetryPolicy {
    fn is_retryable_status_code(&self, code: u16) -> bool {
        self.retryable_checks.lock().unwrap().push(code);
        self.inner.is_retryable_status_code(code)
    }

    fn max_retry_limit(&self) -> u32 {
        self.inner.max_retry_limit()
    }

    fn backoff_factory(&self) -> &dyn BackOffFactory {
        self.inner.backoff_factory()
    }
}

/// Client that is never reached when a scripted executor is installed.
pub struct NoopClient;

#[async_trait]
impl BatchClient<u32, u32> for NoopClient {
    async fn send_batch(
        &self,
        _requests: &[&u32],
        _settings: &BatchSettings,
    ) -> Result<Vec<Result<u32, RequestError>>, RequestError> {
        Ok(Vec::new())
    }
}

/// Task executor that records lifecycle calls; can reject or refuse to terminate.
#[derive(Default)]
pub struct RecordingTaskExecutor {
    inner: DirectExecutor,
    pub reject: AtomicBool,
    pub hang_on_termination: AtomicBool,
    pub shutdown_calls: AtomicUsize,
    pub shutdown_now_calls: AtomicUsize,
    pub await_timeouts: Mutex<Vec<Duration>>,
}

impl RecordingTaskExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl TaskExecutor for RecordingTaskExecutor {
    async fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(RejectedExecution::new("recording_executor", "saturated"));
        }
        self.inner.execute(task).await
    }

    fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown();
    }

    async fn await_termination(&self, timeout: Duration) -> bool {
        self.await_timeouts.lock().unwrap().push(timeout);
        !self.hang_on_termination.load(Ordering::SeqCst)
    }

    fn shutdown_now(&self) {
        self.shutdown_now_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown_now();
    }

    fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }
}

/// Zero-delay fixed backoff with a retry limit.
pub fn retry_policy(max_retry_limit: u32) -> DefaultRetryPolicy {
    DefaultRetryPolicy::new()
        .with_max_retry_limit(max_retry_limit)
        .with_backoff_factory(Arc::new(FixedBackOffFactory::new(FixedBackOff::new(
            Duration::ZERO,
        ))))
}

pub fn batch_policy(max_batch_size: usize) -> BatchPolicy {
    BatchPolicy::builder()
        .max_batch_size(max_batch_size)
        .max_batch_delay(None)
        .build()
        .unwrap()
}

/// Everything a deterministic service test needs to drive and inspect.
pub struct Harness {
    pub service: Service,
    pub executor: Arc<ScriptedExecutor>,
    pub tasks: Arc<RecordingTaskExecutor>,
    pub scheduler: Arc<ManualScheduler>,
    pub clock: Arc<ManualTimeProvider>,
}

pub fn harness(
    executor: Arc<ScriptedExecutor>,
    policy: BatchPolicy,
    retry: Arc<dyn RetryPolicy>,
) -> Harness {
    let tasks = RecordingTaskExecutor::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let clock = Arc::new(ManualTimeProvider::new(0));
    let factory = FixedExecutorFactory::new(
        Arc::clone(&tasks) as Arc<dyn TaskExecutor>,
        Arc::clone(&scheduler) as Arc<dyn TaskScheduler>,
    );
    let service = BatchRequestService::builder()
        .with_client(Arc::new(NoopClient))
        .with_batch_executor(Arc::clone(&executor) as Arc<dyn BatchExecutor<u32, u32>>)
        .with_executor_factory(Arc::new(factory))
        .with_batch_policy(policy)
        .with_retry_policy(retry)
        .with_time_provider(Arc::clone(&clock) as Arc<dyn TimeProvider>)
        .build()
        .unwrap();
    Harness {
        service,
        executor,
        tasks,
        scheduler,
        clock,
    }
}

/// Started harness with a zero-delay retry policy.
pub fn started(executor: Arc<ScriptedExecutor>, max_batch_size: usize, max_retry_limit: u32) -> Harness {
    let h = harness(
        executor,
        batch_policy(max_batch_size),
        Arc::new(retry_policy(max_retry_limit)),
    );
    h.service.start().unwrap();
    h
}
