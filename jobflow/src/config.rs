//! Worker configuration.
//!
//! Values are layered: built-in defaults, then an optional file (any format
//! the `config` crate recognizes by extension), then `JOBFLOW_*` environment
//! variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::JobflowError;
use crate::retry::RetryPolicy;

/// Configuration for a worker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum jobs processed concurrently from one queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum delivery attempts per job, including the first.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base redelivery delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Redelivery delay cap in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// How long a delivery stays invisible before the transport redelivers it.
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    /// Idle sleep between empty polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Name reported in logs and action contexts.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

fn default_concurrency() -> usize {
    5
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_visibility_timeout_ms() -> u64 {
    300_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_worker_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retry_attempts: default_max_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            worker_name: default_worker_name(),
        }
    }
}

impl WorkerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from an optional file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, JobflowError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(Environment::with_prefix("JOBFLOW").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        tracing::debug!(
            worker = %config.worker_name,
            concurrency = config.concurrency,
            max_retry_attempts = config.max_retry_attempts,
            "Worker configuration loaded"
        );
        Ok(config)
    }

    /// Sets the concurrency.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the maximum retry attempts.
    #[must_use]
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Sets the backoff bounds.
    #[must_use]
    pub fn with_backoff_ms(mut self, base: u64, max: u64) -> Self {
        self.backoff_base_ms = base;
        self.backoff_max_ms = max;
        self
    }

    /// Sets the visibility timeout.
    #[must_use]
    pub fn with_visibility_timeout_ms(mut self, timeout: u64) -> Self {
        self.visibility_timeout_ms = timeout;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Sets the worker name.
    #[must_use]
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Validates that every numeric option is positive and bounds are ordered.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::InvalidConfig`] naming the first bad option.
    pub fn validate(&self) -> Result<(), JobflowError> {
        let checks = [
            ("concurrency", self.concurrency == 0),
            ("max_retry_attempts", self.max_retry_attempts == 0),
            ("backoff_base_ms", self.backoff_base_ms == 0),
            ("backoff_max_ms", self.backoff_max_ms == 0),
            ("visibility_timeout_ms", self.visibility_timeout_ms == 0),
            ("poll_interval_ms", self.poll_interval_ms == 0),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(JobflowError::InvalidConfig(format!("{name} must be positive")));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(JobflowError::InvalidConfig(format!(
                "backoff_max_ms ({}) must be >= backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        if self.worker_name.trim().is_empty() {
            return Err(JobflowError::InvalidConfig("worker_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Derives the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_retry_attempts)
            .with_backoff_base_ms(self.backoff_base_ms)
            .with_backoff_max_ms(self.backoff_max_ms)
    }

    /// Returns the visibility timeout.
    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    /// Returns the poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 5);
        assert!(config.worker_name.starts_with("worker-"));
        assert_eq!(config.worker_name.len(), "worker-".len() + 8);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = WorkerConfig::default().with_concurrency(0).validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let err = WorkerConfig::default()
            .with_backoff_ms(5000, 100)
            .validate()
            .unwrap_err();
        assert!(matches!(err, JobflowError::InvalidConfig(_)));
    }

    #[test]
    fn test_retry_policy_derived() {
        let policy = WorkerConfig::default()
            .with_max_retry_attempts(4)
            .with_backoff_ms(50, 400)
            .retry_policy();

        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff_base_ms, 50);
        assert_eq!(policy.backoff_max_ms, 400);
    }

    #[test]
    fn test_load_from_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "concurrency = 2\nmax_retry_attempts = 5\nworker_name = \"w1\"").unwrap();

        let config = WorkerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.worker_name, "w1");
        assert_eq!(config.backoff_base_ms, 1000);
    }

    #[test]
    fn test_load_invalid_file_value() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "backoff_base_ms = 0").unwrap();

        assert!(WorkerConfig::load(Some(file.path())).is_err());
    }
}
