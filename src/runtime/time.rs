use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock used to age batches for timed auto-flush.
pub trait TimeProvider: Send + Sync {
    fn current_time_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn current_time_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Settable clock for deterministic scheduling tests.
#[derive(Debug, Default)]
pub struct ManualTimeProvider {
    now_ms: AtomicU64,
}

impl ManualTimeProvider {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualTimeProvider {
    fn current_time_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_provider() {
        let clock = ManualTimeProvider::new(1_000);
        assert_eq!(clock.current_time_millis(), 1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.current_time_millis(), 3_000);
        clock.set(5);
        assert_eq!(clock.current_time_millis(), 5);
    }

    #[test]
    fn test_system_time_provider_is_monotonic_enough() {
        let clock = SystemTimeProvider;
        let a = clock.current_time_millis();
        let b = clock.current_time_millis();
        assert!(a > 0);
        assert!(b >= a);
    }
}
