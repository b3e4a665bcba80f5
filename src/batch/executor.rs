//! Batch executor: the seam between the dispatcher and the transport.

use super::policy::BatchSettings;
use crate::error::{Interrupted, RequestError};
use crate::request::RequestCallback;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// One transport batch: the callbacks of the requests it carries.
pub struct Batch<R, T> {
    id: Uuid,
    settings: BatchSettings,
    entries: Vec<RequestCallback<R, T>>,
}

impl<R, T> Batch<R, T> {
    pub fn new(settings: BatchSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings,
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    pub fn push(&mut self, callback: RequestCallback<R, T>) {
        self.entries.push(callback);
    }

    pub fn entries(&self) -> &[RequestCallback<R, T>] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RequestCallback<R, T>> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R, T> std::fmt::Debug for Batch<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Builds and executes transport batches.
///
/// `execute` reports each request's outcome through its callback. Requests
/// that receive no callback are failed by the dispatcher. An `Err` from
/// `execute` is a batch-level failure applied to every request still waiting.
#[async_trait]
pub trait BatchExecutor<R, T>: Send + Sync
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn create_batch(&self, settings: &BatchSettings) -> Batch<R, T> {
        Batch::new(*settings)
    }

    /// Add a request to `batch`. An error fails only that request.
    fn queue(
        &self,
        batch: &mut Batch<R, T>,
        callback: RequestCallback<R, T>,
    ) -> Result<(), RequestError> {
        batch.push(callback);
        Ok(())
    }

    async fn execute(&self, batch: Batch<R, T>) -> Result<(), RequestError>;

    /// Backoff sleep between retries.
    async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Transport that sends a batch of payloads in one call.
///
/// Responses are matched to requests by position.
#[async_trait]
pub trait BatchClient<R, T>: Send + Sync
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    async fn send_batch(
        &self,
        requests: &[&R],
        settings: &BatchSettings,
    ) -> Result<Vec<Result<T, RequestError>>, RequestError>;
}

/// [`BatchExecutor`] over a [`BatchClient`], bounded by the batch read timeout.
pub struct DefaultBatchExecutor<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    client: Arc<dyn BatchClient<R, T>>,
}

impl<R, T> DefaultBatchExecutor<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(client: Arc<dyn BatchClient<R, T>>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn BatchClient<R, T>> {
        &self.client
    }
}

#[async_trait]
impl<R, T> BatchExecutor<R, T> for DefaultBatchExecutor<R, T>
where
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    async fn execute(&self, batch: Batch<R, T>) -> Result<(), RequestError> {
        if batch.is_empty() {
            return Ok(());
        }
        let batch_id = batch.id();
        let settings = *batch.settings();
        let entries = batch.into_entries();
        for entry in &entries {
            entry.on_start();
        }

        let payloads: Vec<&R> = entries.iter().map(|e| e.payload()).collect();
        debug!(batch_id = %batch_id, size = payloads.len(), "sending batch");
        let responses = match tokio::time::timeout(
            settings.read_timeout,
            self.client.send_batch(&payloads, &settings),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(RequestError::timeout(format!(
                    "batch read timed out after {:?}",
                    settings.read_timeout
                )))
            }
        };

        if responses.len() != entries.len() {
            warn!(
                batch_id = %batch_id,
                expected = entries.len(),
                received = responses.len(),
                "batch response count mismatch"
            );
        }
        for (entry, response) in entries.iter().zip(responses) {
            match response {
                Ok(value) => entry.on_success(value),
                Err(err) => entry.on_failure(err),
            }
        }
        Ok(())
    }
}
