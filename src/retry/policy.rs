//! Retry policy: which failures are retryable and how many retries are allowed.

use super::backoff::{BackOffFactory, ExponentialBackOffConfig, ExponentialBackOffFactory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Decides retry eligibility for failed requests and supplies their backoff.
///
/// The policy limit and the backoff are independent: a retry happens only
/// while the status code is retryable, the retry count is below
/// [`max_retry_limit`](RetryPolicy::max_retry_limit), *and* the request's
/// backoff has not signalled stop.
pub trait RetryPolicy: Send + Sync {
    /// Total, side-effect-free predicate over a status code.
    fn is_retryable_status_code(&self, code: u16) -> bool;

    /// Maximum number of retries after the original attempt.
    fn max_retry_limit(&self) -> u32;

    fn backoff_factory(&self) -> &dyn BackOffFactory;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retry_limit: u32,
    pub retryable_status_codes: Vec<u16>,
    pub backoff: ExponentialBackOffConfig,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retry_limit: 5,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
            backoff: ExponentialBackOffConfig::default(),
        }
    }
}

/// Status-code set plus exponential backoff.
#[derive(Clone)]
pub struct DefaultRetryPolicy {
    max_retry_limit: u32,
    retryable: BTreeSet<u16>,
    backoff: Arc<dyn BackOffFactory>,
}

impl DefaultRetryPolicy {
    pub fn new() -> Self {
        Self::from_config(&RetryPolicyConfig::default())
    }

    pub fn from_config(config: &RetryPolicyConfig) -> Self {
        Self {
            max_retry_limit: config.max_retry_limit,
            retryable: config.retryable_status_codes.iter().copied().collect(),
            backoff: Arc::new(ExponentialBackOffFactory::new(config.backoff.clone())),
        }
    }

    pub fn with_max_retry_limit(mut self, limit: u32) -> Self {
        self.max_retry_limit = limit;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable = codes.into_iter().collect();
        self
    }

    pub fn with_backoff_factory(mut self, factory: Arc<dyn BackOffFactory>) -> Self {
        self.backoff = factory;
        self
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefaultRetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRetryPolicy")
            .field("max_retry_limit", &self.max_retry_limit)
            .field("retryable", &self.retryable)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn is_retryable_status_code(&self, code: u16) -> bool {
        self.retryable.contains(&code)
    }

    fn max_retry_limit(&self) -> u32 {
        self.max_retry_limit
    }

    fn backoff_factory(&self) -> &dyn BackOffFactory {
        self.backoff.as_ref()
    }
}
