//! Backoff generators.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A sequence of delays between retry attempts.
///
/// `None` is the stop signal: once returned, no further retry is allowed for
/// the request that owns this instance.
pub trait BackOff: Send {
    fn next_backoff(&mut self) -> Option<Duration>;

    /// Restart the sequence from its initial delay.
    fn reset(&mut self);
}

/// Creates a fresh [`BackOff`] for each request that enters a retry sequence.
pub trait BackOffFactory: Send + Sync {
    fn create_backoff(&self) -> Box<dyn BackOff>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExponentialBackOffConfig {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Upper bound on the sum of all delays handed out. `None` never stops.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for ExponentialBackOffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            multiplier: 2.0,
            max_interval_ms: 60_000,
            max_elapsed_ms: Some(15 * 60 * 1_000),
        }
    }
}

impl ExponentialBackOffConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_interval(mut self, d: Duration) -> Self {
        self.initial_interval_ms = d.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, m: f64) -> Self {
        self.multiplier = m;
        self
    }

    pub fn with_max_interval(mut self, d: Duration) -> Self {
        self.max_interval_ms = d.as_millis() as u64;
        self
    }

    pub fn with_max_elapsed(mut self, d: Option<Duration>) -> Self {
        self.max_elapsed_ms = d.map(|d| d.as_millis() as u64);
        self
    }
}

/// Truncated exponential backoff.
///
/// Elapsed time is the sum of delays already handed out rather than wall
/// clock, so the sequence is deterministic.
#[derive(Debug, Clone)]
pub struct ExponentialBackOff {
    config: ExponentialBackOffConfig,
    current_ms: u64,
    elapsed_ms: u64,
}

impl ExponentialBackOff {
    pub fn new(config: ExponentialBackOffConfig) -> Self {
        let current_ms = config.initial_interval_ms.min(config.max_interval_ms);
        Self {
            config,
            current_ms,
            elapsed_ms: 0,
        }
    }
}

impl BackOff for ExponentialBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.current_ms;
        if let Some(max_elapsed) = self.config.max_elapsed_ms {
            if self.elapsed_ms.saturating_add(delay) > max_elapsed {
                return None;
            }
        }
        self.elapsed_ms = self.elapsed_ms.saturating_add(delay);

        let multiplier = if self.config.multiplier.is_finite() && self.config.multiplier >= 1.0 {
            self.config.multiplier
        } else {
            1.0
        };
        let next = (delay as f64 * multiplier).min(self.config.max_interval_ms as f64);
        self.current_ms = next as u64;
        Some(Duration::from_millis(delay))
    }

    fn reset(&mut self) {
        self.current_ms = self
            .config
            .initial_interval_ms
            .min(self.config.max_interval_ms);
        self.elapsed_ms = 0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExponentialBackOffFactory {
    config: ExponentialBackOffConfig,
}

impl ExponentialBackOffFactory {
    pub fn new(config: ExponentialBackOffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExponentialBackOffConfig {
        &self.config
    }
}

impl BackOffFactory for ExponentialBackOffFactory {
    fn create_backoff(&self) -> Box<dyn BackOff> {
        Box::new(ExponentialBackOff::new(self.config.clone()))
    }
}

/// Constant delay, optionally limited to a number of attempts.
#[derive(Debug, Clone)]
pub struct FixedBackOff {
    delay: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl FixedBackOff {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            attempts: 0,
        }
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }
}

impl BackOff for FixedBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        self.attempts += 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Factory handing out clones of a template [`FixedBackOff`].
#[derive(Debug, Clone)]
pub struct FixedBackOffFactory {
    template: FixedBackOff,
}

impl FixedBackOffFactory {
    pub fn new(template: FixedBackOff) -> Self {
        Self { template }
    }
}

impl BackOffFactory for FixedBackOffFactory {
    fn create_backoff(&self) -> Box<dyn BackOff> {
        let mut backoff = self.template.clone();
        backoff.reset();
        Box::new(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence_grows_and_caps() {
        let config = ExponentialBackOffConfig::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_millis(350))
            .with_max_elapsed(None);
        let mut backoff = ExponentialBackOff::new(config);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn test_exponential_stops_after_max_elapsed() {
        let config = ExponentialBackOffConfig::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed(Some(Duration::from_millis(300)));
        let mut backoff = ExponentialBackOff::new(config);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        // 100 + 200 + 400 would exceed the 300ms budget
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_exponential_ignores_shrinking_multiplier() {
        let config = ExponentialBackOffConfig::new()
            .with_initial_interval(Duration::from_millis(50))
            .with_multiplier(0.5)
            .with_max_elapsed(None);
        let mut backoff = ExponentialBackOff::new(config);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_fixed_backoff_limit() {
        let mut backoff = FixedBackOff::new(Duration::from_millis(5)).with_max_attempts(2);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn test_factories_create_fresh_instances() {
        let factory =
            FixedBackOffFactory::new(FixedBackOff::new(Duration::ZERO).with_max_attempts(1));
        let mut first = factory.create_backoff();
        assert!(first.next_backoff().is_some());
        assert!(first.next_backoff().is_none());

        let mut second = factory.create_backoff();
        assert!(second.next_backoff().is_some());
    }
}
