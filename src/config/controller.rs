//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::ConfigError;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum number of units allowed to be unavailable at once
    /// A unit that is not ready, approved or under maintenance counts against it
    pub max_unavailable: usize,
    /// Periodic resync interval (seconds)
    /// Every cached key is re-queued at this interval even without watch events
    pub resync_interval_secs: u64,
    /// Number of workers draining the queue
    pub worker_count: usize,
    /// Consecutive failures tolerated per key before it is dropped
    pub max_retry_attempts: u32,
    /// Namespace holding the managed fleet ("" watches all namespaces)
    pub watch_namespace: String,
    /// Exponential backoff starting value (milliseconds)
    /// Initial delay before retrying after an error
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    /// Maximum delay between retries
    pub backoff_max_ms: u64,
    /// Overall queue admission rate (keys per second)
    pub queue_qps: f64,
    /// Overall queue burst size
    pub queue_burst: u32,
    /// How long startup waits for the first full list of the fleet (seconds)
    pub cache_sync_timeout_secs: u64,
    /// Serialize the budget check and the approval write behind one lock
    /// Trades approval throughput for an exact bound across workers
    pub strict_admission: bool,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            max_unavailable: DEFAULT_MAX_UNAVAILABLE,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            worker_count: DEFAULT_WORKER_COUNT,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            watch_namespace: DEFAULT_WATCH_NAMESPACE.to_string(),
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            queue_qps: DEFAULT_QUEUE_QPS,
            queue_burst: DEFAULT_QUEUE_BURST,
            cache_sync_timeout_secs: DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
            strict_admission: false,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            max_unavailable: env_var_or_default("MAX_UNAVAILABLE", DEFAULT_MAX_UNAVAILABLE),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            worker_count: env_var_or_default("WORKER_COUNT", DEFAULT_WORKER_COUNT),
            max_retry_attempts: env_var_or_default(
                "MAX_RETRY_ATTEMPTS",
                DEFAULT_MAX_RETRY_ATTEMPTS,
            ),
            watch_namespace: env_var_or_default_str("WATCH_NAMESPACE", DEFAULT_WATCH_NAMESPACE),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            queue_qps: env_var_or_default("QUEUE_QPS", DEFAULT_QUEUE_QPS),
            queue_burst: env_var_or_default("QUEUE_BURST", DEFAULT_QUEUE_BURST),
            cache_sync_timeout_secs: env_var_or_default(
                "CACHE_SYNC_TIMEOUT_SECS",
                DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
            ),
            strict_admission: env_var_or_default_bool("STRICT_ADMISSION", false),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_count",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_retry_attempts",
                reason: "must allow at least one retry".to_string(),
            });
        }
        if self.resync_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "resync_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache_sync_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_sync_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.backoff_max_ms == 0 || self.backoff_start_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid {
                field: "backoff_max_ms",
                reason: format!(
                    "must be non-zero and >= backoff_start_ms ({}ms)",
                    self.backoff_start_ms
                ),
            });
        }
        if !(self.queue_qps > 0.0) || self.queue_burst == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_qps",
                reason: "queue rate and burst must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get resync interval duration
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get cache sync timeout duration
    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_unavailable, 1);
        assert_eq!(config.resync_interval(), Duration::from_secs(10));
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.watch_namespace, "default");
        assert!(!config.strict_admission);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ControllerConfig {
            worker_count: 0,
            ..ControllerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker_count"));
    }

    #[test]
    fn test_backoff_start_above_max_rejected() {
        let config = ControllerConfig {
            backoff_start_ms: 5_000,
            backoff_max_ms: 1_000,
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let config = ControllerConfig {
            max_retry_attempts: 0,
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cache_sync_timeout_rejected() {
        let config = ControllerConfig {
            cache_sync_timeout_secs: 0,
            ..ControllerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache_sync_timeout_secs"));
    }
}
