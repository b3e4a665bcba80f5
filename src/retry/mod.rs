//! Retry decisions and backoff generation.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RetryPolicy`] | Retryable status codes and the retry limit |
//! | [`DefaultRetryPolicy`] | Status-code set with exponential backoff |
//! | [`BackOff`] | Per-request delay sequence ending in a stop signal |
//! | [`BackOffFactory`] | Creates a fresh [`BackOff`] per retrying request |

mod backoff;
mod policy;

pub use backoff::{
    BackOff, BackOffFactory, ExponentialBackOff, ExponentialBackOffConfig,
    ExponentialBackOffFactory, FixedBackOff, FixedBackOffFactory,
};
pub use policy::{DefaultRetryPolicy, RetryPolicy, RetryPolicyConfig};
