//! Batch Dispatch Demo
//!
//! Submits requests to a simulated batch endpoint that throttles some of them,
//! showing size-triggered and timed flushes, per-request retries and a
//! flushing shutdown.
//!
//! Usage:
//!   RUST_LOG=batch_request_service=debug cargo run --example batch_dispatch

use async_trait::async_trait;
use batch_request_service::batch::{BatchClient, BatchPolicy, BatchSettings};
use batch_request_service::retry::{ExponentialBackOffConfig, ExponentialBackOffFactory};
use batch_request_service::{BatchRequestService, DefaultRetryPolicy, RequestError, ServiceConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Simulated endpoint: every third call throttles odd ids.
struct SimulatedEndpoint {
    calls: AtomicUsize,
}

#[async_trait]
impl BatchClient<u32, String> for SimulatedEndpoint {
    async fn send_batch(
        &self,
        requests: &[&u32],
        _settings: &BatchSettings,
    ) -> Result<Vec<Result<String, RequestError>>, RequestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        println!("  -> endpoint call {} with {} request(s)", call + 1, requests.len());
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(requests
            .iter()
            .map(|id| {
                if call % 3 == 0 && **id % 2 == 1 {
                    Err(RequestError::remote(429, "rate limited"))
                } else {
                    Ok(format!("document-{}", id))
                }
            })
            .collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("batch_request_service=info")),
        )
        .init();

    println!("=== Batch Request Service Demo ===\n");

    let config = ServiceConfig::from_env()?;
    let policy = BatchPolicy::builder()
        .max_batch_size(config.batch.max_batch_size.min(4))
        .max_batch_delay(Some(Duration::from_millis(100)))
        .build()?;
    let retry = DefaultRetryPolicy::from_config(&config.retry).with_backoff_factory(Arc::new(
        ExponentialBackOffFactory::new(
            ExponentialBackOffConfig::new().with_initial_interval(Duration::from_millis(50)),
        ),
    ));

    let service: BatchRequestService<u32, String> = BatchRequestService::builder()
        .with_client(Arc::new(SimulatedEndpoint {
            calls: AtomicUsize::new(0),
        }))
        .with_batch_policy(policy)
        .with_retry_policy(Arc::new(retry))
        .build()?;
    service.start()?;

    println!("--- Submitting 10 requests (max batch size 4) ---\n");
    let mut responses = Vec::new();
    for id in 0..10 {
        responses.push((id, service.submit(id).await?));
    }
    println!("\n  pending in current batch: {}\n", service.current_batch_size());

    println!("--- Waiting for timed flush and retries ---\n");
    for (id, response) in responses {
        match response.await {
            Ok(doc) => println!("  request {:>2}: {}", id, doc),
            Err(err) => println!("  request {:>2}: failed ({})", id, err),
        }
    }

    service.stop().await?;
    println!("\n--- Stats ---\n");
    println!("{}", serde_json::to_string_pretty(&service.stats())?);
    Ok(())
}
