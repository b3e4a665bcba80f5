//! File and environment configuration for the batch service.
//!
//! ```yaml
//! batch:
//!   max_batch_size: 50
//!   max_batch_delay_ms: 250
//!   flush_on_shutdown: true
//! retry:
//!   max_retry_limit: 3
//!   retryable_status_codes: [429, 503]
//!   backoff:
//!     initial_interval_ms: 100
//! ```
//!
//! Environment variables override file values:
//! `BATCH_MAX_SIZE`, `BATCH_MAX_DELAY_MS` (`0` disables timed flush),
//! `BATCH_FLUSH_ON_SHUTDOWN`, `BATCH_SHUTDOWN_TIMEOUT_SECS`,
//! `BATCH_RETRY_MAX_LIMIT`.

use crate::batch::{BatchPolicy, BatchPolicyConfig};
use crate::retry::{DefaultRetryPolicy, RetryPolicyConfig};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub const ENV_MAX_BATCH_SIZE: &str = "BATCH_MAX_SIZE";
pub const ENV_MAX_BATCH_DELAY_MS: &str = "BATCH_MAX_DELAY_MS";
pub const ENV_FLUSH_ON_SHUTDOWN: &str = "BATCH_FLUSH_ON_SHUTDOWN";
pub const ENV_SHUTDOWN_TIMEOUT_SECS: &str = "BATCH_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_RETRY_MAX_LIMIT: &str = "BATCH_RETRY_MAX_LIMIT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub batch: BatchPolicyConfig,
    pub retry: RetryPolicyConfig,
}

impl ServiceConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load by extension: `.json` as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by the `BATCH_*` variable names.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = parse_var::<usize>(&lookup, ENV_MAX_BATCH_SIZE)? {
            self.batch.max_batch_size = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_MAX_BATCH_DELAY_MS)? {
            self.batch.max_batch_delay_ms = (ms > 0).then_some(ms);
        }
        if let Some(flush) = parse_var::<bool>(&lookup, ENV_FLUSH_ON_SHUTDOWN)? {
            self.batch.flush_on_shutdown = flush;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_SHUTDOWN_TIMEOUT_SECS)? {
            self.batch.shutdown_timeout_secs = secs;
        }
        if let Some(limit) = parse_var::<u32>(&lookup, ENV_RETRY_MAX_LIMIT)? {
            self.retry.max_retry_limit = limit;
        }
        Ok(())
    }

    pub fn batch_policy(&self) -> Result<BatchPolicy> {
        BatchPolicy::from_config(&self.batch)
    }

    pub fn retry_policy(&self) -> DefaultRetryPolicy {
        DefaultRetryPolicy::from_config(&self.retry)
    }
}

fn parse_var<V: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<V>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim().parse::<V>().map(Some).map_err(|_| {
        Error::configuration_with_context(
            format!("invalid value for {}", key),
            ErrorContext::new()
                .with_field_path(key)
                .with_details(format!("got {:?}", raw))
                .with_source("environment"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_yaml_config_with_defaults() {
        let config = ServiceConfig::from_yaml_str(
            r#"
batch:
  max_batch_size: 50
  max_batch_delay_ms: 250
retry:
  max_retry_limit: 3
  retryable_status_codes: [429, 503]
"#,
        )
        .unwrap();
        let batch = config.batch_policy().unwrap();
        assert_eq!(batch.max_batch_size(), 50);
        assert_eq!(batch.max_batch_delay(), Some(Duration::from_millis(250)));
        assert!(batch.flush_on_shutdown());
        assert_eq!(config.retry.max_retry_limit, 3);
        assert_eq!(config.retry.backoff.initial_interval_ms, 1_000);
    }

    #[test]
    fn test_json_config() {
        let config = ServiceConfig::from_json_str(r#"{"batch": {"flush_on_shutdown": false}}"#).unwrap();
        assert!(!config.batch.flush_on_shutdown);
        assert_eq!(config.batch.max_batch_size, 10);
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = ServiceConfig::from_yaml_str("batch: [1, 2").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_MAX_BATCH_SIZE, "25"),
                (ENV_MAX_BATCH_DELAY_MS, "0"),
                (ENV_FLUSH_ON_SHUTDOWN, "false"),
                (ENV_RETRY_MAX_LIMIT, " 7 "),
            ]))
            .unwrap();
        assert_eq!(config.batch.max_batch_size, 25);
        assert_eq!(config.batch.max_batch_delay_ms, None);
        assert!(!config.batch.flush_on_shutdown);
        assert_eq!(config.batch.shutdown_timeout_secs, 10);
        assert_eq!(config.retry.max_retry_limit, 7);
    }

    #[test]
    fn test_invalid_override_names_variable() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_MAX_BATCH_SIZE, "lots")]))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some(ENV_MAX_BATCH_SIZE)
        );
        assert_eq!(config.batch.max_batch_size, 10);
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = std::env::temp_dir().join(format!("batch-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let yaml = dir.join("service.yaml");
        std::fs::write(&yaml, "batch:\n  max_batch_size: 4\n").unwrap();
        let json = dir.join("service.json");
        std::fs::write(&json, r#"{"retry": {"max_retry_limit": 1}}"#).unwrap();

        assert_eq!(ServiceConfig::from_file(&yaml).unwrap().batch.max_batch_size, 4);
        assert_eq!(ServiceConfig::from_file(&json).unwrap().retry.max_retry_limit, 1);
        assert!(matches!(
            ServiceConfig::from_file(dir.join("missing.yaml")),
            Err(Error::Io(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
