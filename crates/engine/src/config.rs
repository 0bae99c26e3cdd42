//! Ledger configuration via `tally.toml`
//!
//! Every setting has a default, so an empty file (or no file) is a valid
//! configuration. Values are range-checked when loaded.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tally_core::{TallyError, TallyResult};

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "tally.toml";

fn default_lock_wait_ms() -> u64 {
    2000
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    5
}

fn default_retry_max_delay_ms() -> u64 {
    100
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Ledger configuration loaded from `tally.toml`.
///
/// # Example
///
/// ```toml
/// # Abort transactions whose business logic runs longer than this
/// execution_timeout_ms = 5000
///
/// # Longest wait for a registry held by another transaction
/// lock_wait_ms = 2000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Execution budget per attempt; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout_ms: Option<u64>,
    /// Longest wait for one registry's execution latch.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// Retries after a latch wait expires (0 = no retries).
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base delay between retries (exponential backoff).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cap on the delay between retries.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Events buffered between committers and the dispatcher thread.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: None,
            lock_wait_ms: default_lock_wait_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl LedgerConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tally ledger configuration

# Execution budget per transaction attempt, in milliseconds.
# Unlimited when absent.
# execution_timeout_ms = 5000

# Longest wait for a registry claimed by another transaction (default: 2000).
lock_wait_ms = 2000

# Retries after a wait expires, with exponential backoff.
max_retries = 3
retry_base_delay_ms = 5
retry_max_delay_ms = 100

# Events buffered ahead of the dispatcher thread (default: 1024).
event_channel_capacity = 1024
"#
    }

    /// Parse and validate a TOML string.
    ///
    /// # Errors
    ///
    /// `Config` if the text is not valid TOML, has unknown keys, or holds
    /// out-of-range values.
    pub fn from_toml_str(content: &str) -> TallyResult<Self> {
        let config: LedgerConfig = toml::from_str(content).map_err(|e| TallyError::Config {
            reason: format!("failed to parse configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> TallyResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TallyError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            TallyError::Config { reason } => TallyError::Config {
                reason: format!("{}: {}", path.display(), reason),
            },
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> TallyResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| TallyError::Config {
            reason: format!("failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| TallyError::Config {
            reason: format!("failed to write config file '{}': {}", path.display(), e),
        })
    }

    /// Check value ranges.
    pub fn validate(&self) -> TallyResult<()> {
        if self.execution_timeout_ms == Some(0) {
            return Err(config_error("execution_timeout_ms must be positive"));
        }
        if self.event_channel_capacity == 0 {
            return Err(config_error("event_channel_capacity must be positive"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(config_error(
                "retry_base_delay_ms must not exceed retry_max_delay_ms",
            ));
        }
        Ok(())
    }

    /// Execution budget as a duration.
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    /// Latch wait as a duration.
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Retry policy derived from this config.
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Set the execution budget.
    pub fn with_execution_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.execution_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the latch wait.
    pub fn with_lock_wait_ms(mut self, lock_wait_ms: u64) -> Self {
        self.lock_wait_ms = lock_wait_ms;
        self
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the event queue bound.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

fn config_error(reason: &str) -> TallyError {
    TallyError::Config {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = LedgerConfig::default();
        assert_eq!(config.execution_timeout(), None);
        assert_eq!(config.lock_wait(), Duration::from_millis(2000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.event_channel_capacity, 1024);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        assert_eq!(LedgerConfig::from_toml_str("").unwrap(), LedgerConfig::default());
    }

    #[test]
    fn default_toml_parses_correctly() {
        assert_eq!(
            LedgerConfig::from_toml_str(LedgerConfig::default_toml()).unwrap(),
            LedgerConfig::default()
        );
    }

    #[test]
    fn parse_timeout() {
        let config = LedgerConfig::from_toml_str("execution_timeout_ms = 250").unwrap();
        assert_eq!(config.execution_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = LedgerConfig::from_toml_str("execution_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, TallyError::Config { .. }));
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(LedgerConfig::from_toml_str("durability = \"always\"").is_err());
    }

    #[test]
    fn wrong_type_rejected() {
        assert!(LedgerConfig::from_toml_str("lock_wait_ms = \"soon\"").is_err());
    }

    #[test]
    fn inverted_retry_delays_rejected() {
        let toml = "retry_base_delay_ms = 500\nretry_max_delay_ms = 100";
        assert!(LedgerConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn write_then_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = LedgerConfig::default()
            .with_execution_timeout_ms(1000)
            .with_max_retries(7);
        config.write_to_file(&path).unwrap();
        assert_eq!(LedgerConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = LedgerConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, TallyError::Config { .. }));
    }
}
