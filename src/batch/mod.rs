//! Request batching: policy, pending-request collection and the executor seam.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchPolicy`] | Size and delay thresholds, shutdown behavior, transport timeouts |
//! | [`BatchSettings`] | Timeouts handed to each transport batch |
//! | [`Batch`] | Callbacks of the requests carried by one transport call |
//! | [`BatchExecutor`] | Builds and executes batches, reporting through callbacks |
//! | [`BatchClient`] | Transport sending a batch of payloads in one call |
//! | [`DefaultBatchExecutor`] | [`BatchExecutor`] over a [`BatchClient`] |
//!
//! ## Example
//!
//! ```rust
//! use batch_request_service::batch::BatchPolicy;
//! use std::time::Duration;
//!
//! let policy = BatchPolicy::builder()
//!     .max_batch_size(25)
//!     .max_batch_delay(Some(Duration::from_millis(200)))
//!     .build()
//!     .unwrap();
//! assert_eq!(policy.max_batch_size(), 25);
//! ```

pub(crate) mod collector;
mod executor;
mod policy;

pub use executor::{Batch, BatchClient, BatchExecutor, DefaultBatchExecutor};
pub use policy::{BatchPolicy, BatchPolicyBuilder, BatchPolicyConfig, BatchSettings};
