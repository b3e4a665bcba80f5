//! # batch-request-service
//!
//! Client-side request batching for services that accept many calls in one
//! transport round trip.
//!
//! ## Overview
//!
//! Callers wrap each call in an [`AsyncRequest`] and add it to a
//! [`BatchRequestService`]. The service accumulates requests into a pending
//! batch and flushes it when it reaches the configured size, when the oldest
//! request has waited the configured delay, on an explicit flush, or at
//! shutdown. Failed requests are retried individually with backoff according
//! to their [`RetryPolicy`]. Each request's outcome is delivered only through
//! its own [`ResponseFuture`].
//!
//! ## Key Features
//!
//! - **Size and time triggers**: [`batch::BatchPolicy`] bounds batch size and age
//! - **Per-request retry**: retryable status codes, a retry limit and a backoff,
//!   all supplied by [`retry::RetryPolicy`]
//! - **Explicit lifecycle**: `NEW → STARTING → RUNNING → STOPPING → TERMINATED`,
//!   with flush-on-shutdown or cancellation of pending requests
//! - **Injectable execution**: executors, scheduler and clock come from
//!   [`runtime`] traits, with deterministic doubles for tests
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`request`] | Request state machine, callbacks and completion futures |
//! | [`retry`] | Retry policies and backoff generators |
//! | [`batch`] | Batch policy, batches and the executor/client seam |
//! | [`runtime`] | Execution and scheduling resources, clocks |
//! | [`service`] | The dispatcher and its builder |
//! | [`stats`] | Dispatch counters |
//! | [`config`] | YAML/JSON configuration with environment overrides |

pub mod batch;
pub mod config;
pub mod request;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod stats;

// Re-export main types for convenience
pub use batch::{BatchClient, BatchExecutor, BatchPolicy, BatchSettings};
pub use config::ServiceConfig;
pub use request::{AsyncRequest, RequestCallback, ResponseFuture, Status};
pub use retry::{DefaultRetryPolicy, RetryPolicy};
pub use service::{BatchRequestService, BatchRequestServiceBuilder, FlushHandle, ServiceState};
pub use stats::BatchStatsSnapshot;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, Interrupted, RequestError};
