//! Batch policy: size and delay thresholds, shutdown behavior, transport timeouts.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts applied to each transport batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Immutable once built; shared by the service for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    max_batch_size: usize,
    max_batch_delay: Option<Duration>,
    flush_on_shutdown: bool,
    batch_connect_timeout: Duration,
    batch_read_timeout: Duration,
    shutdown_timeout: Duration,
}

impl BatchPolicy {
    pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
    pub const DEFAULT_MAX_BATCH_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(120);
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn builder() -> BatchPolicyBuilder {
        BatchPolicyBuilder::new()
    }

    pub fn from_config(config: &BatchPolicyConfig) -> Result<Self> {
        BatchPolicyBuilder::new()
            .max_batch_size(config.max_batch_size)
            .max_batch_delay(config.max_batch_delay_ms.map(Duration::from_millis))
            .flush_on_shutdown(config.flush_on_shutdown)
            .batch_connect_timeout(Duration::from_secs(config.batch_connect_timeout_secs))
            .batch_read_timeout(Duration::from_secs(config.batch_read_timeout_secs))
            .shutdown_timeout(Duration::from_secs(config.shutdown_timeout_secs))
            .build()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// `None` disables timed auto-flush.
    pub fn max_batch_delay(&self) -> Option<Duration> {
        self.max_batch_delay
    }

    pub fn flush_on_shutdown(&self) -> bool {
        self.flush_on_shutdown
    }

    pub fn batch_connect_timeout(&self) -> Duration {
        self.batch_connect_timeout
    }

    pub fn batch_read_timeout(&self) -> Duration {
        self.batch_read_timeout
    }

    /// Await-termination window for each execution resource during stop.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            connect_timeout: self.batch_connect_timeout,
            read_timeout: self.batch_read_timeout,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
            max_batch_delay: Some(Self::DEFAULT_MAX_BATCH_DELAY),
            flush_on_shutdown: true,
            batch_connect_timeout: Self::DEFAULT_BATCH_TIMEOUT,
            batch_read_timeout: Self::DEFAULT_BATCH_TIMEOUT,
            shutdown_timeout: Self::DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchPolicyBuilder {
    policy: BatchPolicy,
}

impl BatchPolicyBuilder {
    pub fn new() -> Self {
        Self {
            policy: BatchPolicy::default(),
        }
    }

    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.policy.max_batch_size = n;
        self
    }

    pub fn max_batch_delay(mut self, delay: Option<Duration>) -> Self {
        self.policy.max_batch_delay = delay;
        self
    }

    pub fn flush_on_shutdown(mut self, enable: bool) -> Self {
        self.policy.flush_on_shutdown = enable;
        self
    }

    pub fn batch_connect_timeout(mut self, timeout: Duration) -> Self {
        self.policy.batch_connect_timeout = timeout;
        self
    }

    pub fn batch_read_timeout(mut self, timeout: Duration) -> Self {
        self.policy.batch_read_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.policy.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<BatchPolicy> {
        let p = self.policy;
        if p.max_batch_size == 0 {
            return Err(invalid("batch.max_batch_size", "max batch size must be at least 1"));
        }
        if p.max_batch_delay == Some(Duration::ZERO) {
            return Err(invalid(
                "batch.max_batch_delay",
                "max batch delay must be positive; use None to disable timed flush",
            ));
        }
        if p.batch_connect_timeout.is_zero() || p.batch_read_timeout.is_zero() {
            return Err(invalid("batch.timeouts", "batch timeouts must be positive"));
        }
        Ok(p)
    }
}

impl Default for BatchPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(field: &str, msg: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("batch_policy"),
    )
}

/// Serializable form of [`BatchPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicyConfig {
    pub max_batch_size: usize,
    pub max_batch_delay_ms: Option<u64>,
    pub flush_on_shutdown: bool,
    pub batch_connect_timeout_secs: u64,
    pub batch_read_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for BatchPolicyConfig {
    fn default() -> Self {
        Self {
            max_batch_size: BatchPolicy::DEFAULT_MAX_BATCH_SIZE,
            max_batch_delay_ms: Some(BatchPolicy::DEFAULT_MAX_BATCH_DELAY.as_millis() as u64),
            flush_on_shutdown: true,
            batch_connect_timeout_secs: BatchPolicy::DEFAULT_BATCH_TIMEOUT.as_secs(),
            batch_read_timeout_secs: BatchPolicy::DEFAULT_BATCH_TIMEOUT.as_secs(),
            shutdown_timeout_secs: BatchPolicy::DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        }
    }
}
