use super::dispatch::{Lifecycle, ServiceInner};
use super::{BatchRequestService, ServiceState};
use crate::batch::collector::BatchCollector;
use crate::batch::{BatchClient, BatchExecutor, BatchPolicy, DefaultBatchExecutor};
use crate::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::runtime::{DefaultExecutorFactory, ExecutorFactory, SystemTimeProvider, TimeProvider};
use crate::stats::BatchStats;
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Builder for [`BatchRequestService`].
///
/// Only the client is required. Defaults: [`DefaultExecutorFactory`],
/// [`DefaultBatchExecutor`] over the client, [`BatchPolicy::default`],
/// [`DefaultRetryPolicy`] and [`SystemTimeProvider`].
pub struct BatchRequestServiceBuilder<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    client: Option<Arc<dyn BatchClient<R, T>>>,
    executor_factory: Option<Arc<dyn ExecutorFactory>>,
    batch_executor: Option<Arc<dyn BatchExecutor<R, T>>>,
    batch_policy: Option<BatchPolicy>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    time: Option<Arc<dyn TimeProvider>>,
}

impl<R, T> BatchRequestServiceBuilder<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            client: None,
            executor_factory: None,
            batch_executor: None,
            batch_policy: None,
            retry_policy: None,
            time: None,
        }
    }

    /// Target service client. Required.
    pub fn with_client(mut self, client: Arc<dyn BatchClient<R, T>>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_executor_factory(mut self, factory: Arc<dyn ExecutorFactory>) -> Self {
        self.executor_factory = Some(factory);
        self
    }

    /// Replace the default client-backed batch executor.
    pub fn with_batch_executor(mut self, executor: Arc<dyn BatchExecutor<R, T>>) -> Self {
        self.batch_executor = Some(executor);
        self
    }

    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = Some(policy);
        self
    }

    /// Policy given to requests created through the service.
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn build(self) -> Result<BatchRequestService<R, T>> {
        let client = self.client.ok_or_else(|| {
            Error::configuration_with_context(
                "a batch client is required",
                ErrorContext::new()
                    .with_field_path("client")
                    .with_source("service_builder"),
            )
        })?;
        let batch_executor = self.batch_executor.unwrap_or_else(|| {
            Arc::new(DefaultBatchExecutor::new(Arc::clone(&client))) as Arc<dyn BatchExecutor<R, T>>
        });
        let policy = self.batch_policy.unwrap_or_default();

        Ok(BatchRequestService {
            inner: Arc::new(ServiceInner {
                client,
                batch_executor,
                executor_factory: self
                    .executor_factory
                    .unwrap_or_else(|| Arc::new(DefaultExecutorFactory::default())),
                batch: tokio::sync::Mutex::new(BatchCollector::new(policy.max_batch_size())),
                policy,
                retry_policy: self
                    .retry_policy
                    .unwrap_or_else(|| Arc::new(DefaultRetryPolicy::default())),
                time: self.time.unwrap_or_else(|| Arc::new(SystemTimeProvider)),
                lifecycle: Mutex::new(Lifecycle {
                    state: ServiceState::New,
                    executor: None,
                    scheduler: None,
                }),
                current_size: AtomicUsize::new(0),
                in_flight: Mutex::new(HashMap::new()),
                next_flush_id: AtomicU64::new(1),
                stats: BatchStats::new(),
                abandon_retries: CancellationToken::new(),
            }),
        })
    }
}

impl<R, T> Default for BatchRequestServiceBuilder<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
