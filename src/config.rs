//! Application-level configuration loading: round windows, socket handshake and archival retry.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_LIVE_BACK_CONFIG_PATH";

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Default answering window of a fastest-finger question.
    #[serde(rename = "fff_time_limit_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fff_time_limit: Duration,
    /// Default voting window of an audience poll.
    #[serde(rename = "ata_window_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ata_window: Duration,
    /// Delay granted to a participant socket to send its `join` frame.
    #[serde(rename = "identification_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub identification_timeout: Duration,
    /// Archive attempts made when a session ends before giving up until the host retries.
    pub archive_max_attempts: u32,
    /// First delay between archive attempts; doubled after each failure.
    #[serde(rename = "archive_initial_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub archive_initial_delay: Duration,
    /// Upper bound of the archive retry delay.
    #[serde(rename = "archive_max_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub archive_max_delay: Duration,
    /// Capacity of the host event stream channel.
    pub channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fff_time_limit: Duration::from_millis(20_000),
            ata_window: Duration::from_millis(30_000),
            identification_timeout: Duration::from_millis(10_000),
            archive_max_attempts: 3,
            archive_initial_delay: Duration::from_millis(500),
            archive_max_delay: Duration::from_millis(5_000),
            channel_capacity: 64,
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        fff_time_limit_ms = config.fff_time_limit.as_millis() as u64,
                        ata_window_ms = config.ata_window.as_millis() as u64,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; missing keys take their default value.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let config = serde_json::from_str::<Self>(contents)?;
        Ok(config.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.archive_max_attempts = self.archive_max_attempts.max(1);
        self.channel_capacity = self.channel_capacity.max(1);
        if self.archive_max_delay < self.archive_initial_delay {
            self.archive_max_delay = self.archive_initial_delay;
        }
        self
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = AppConfig::parse(r#"{ "fff_time_limit_ms": 15000 }"#).unwrap();
        assert_eq!(config.fff_time_limit, Duration::from_secs(15));
        assert_eq!(config.ata_window, AppConfig::default().ata_window);
        assert_eq!(config.archive_max_attempts, 3);
    }

    #[test]
    fn degenerate_values_are_clamped() {
        let config = AppConfig::parse(
            r#"{ "archive_max_attempts": 0, "channel_capacity": 0,
                 "archive_initial_delay_ms": 900, "archive_max_delay_ms": 100 }"#,
        )
        .unwrap();
        assert_eq!(config.archive_max_attempts, 1);
        assert_eq!(config.channel_capacity, 1);
        assert_eq!(config.archive_max_delay, Duration::from_millis(900));
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(AppConfig::parse("{ not json").is_err());
    }
}
