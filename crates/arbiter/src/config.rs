//! Arbiter configuration
//!
//! The configuration is loaded once from a mounted YAML file and passed into
//! the [`Coordinator`](crate::Coordinator) explicitly. Hub connection settings
//! may be overridden from the environment so credentials can come from a
//! Kubernetes Secret instead of the ConfigMap.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ArbiterError, Result};

/// Environment variable overriding the Hub host.
pub const ENV_HUB_HOST: &str = "HUB_HOST";
/// Environment variable overriding the Hub port.
pub const ENV_HUB_PORT: &str = "HUB_PORT";
/// Environment variable overriding the Hub URL scheme.
pub const ENV_HUB_SCHEME: &str = "HUB_SCHEME";
/// Environment variable overriding the Hub user.
pub const ENV_HUB_USER: &str = "HUB_USER";
/// Environment variable overriding the Hub password.
pub const ENV_HUB_PASSWORD: &str = "HUB_PASSWORD";

/// Main arbiter configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArbiterConfig {
    /// Hub server connection
    pub hub: HubConfig,

    /// Scanner version reported to the Hub
    #[serde(rename = "scannerVersion", default = "default_scanner_version")]
    pub scanner_version: String,

    /// Number of concurrent scan workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the scan job queue (0 is treated as 1)
    #[serde(rename = "queueCapacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds between notification sweeps over every known image
    #[serde(
        rename = "notificationIntervalSecs",
        default = "default_notification_interval"
    )]
    pub notification_interval_secs: u64,

    /// Seconds without a status change before initial load is considered settled
    #[serde(rename = "settleWindowSecs", default = "default_settle_window")]
    pub settle_window_secs: u64,

    /// Seconds between settle checks during initial load
    #[serde(rename = "settlePollSecs", default = "default_settle_poll")]
    pub settle_poll_secs: u64,
}

/// Hub server connection settings
#[derive(Clone, Deserialize, Serialize)]
pub struct HubConfig {
    /// Hub host name
    pub host: String,

    /// Hub port
    #[serde(default = "default_hub_port")]
    pub port: u16,

    /// URL scheme (http or https)
    #[serde(default = "default_hub_scheme")]
    pub scheme: String,

    /// Hub user
    #[serde(default = "default_hub_user")]
    pub user: String,

    /// Hub password
    #[serde(default)]
    pub password: String,

    /// Per-request timeout in seconds
    #[serde(rename = "timeoutSecs", default = "default_hub_timeout")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("scheme", &self.scheme)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HubConfig {
    /// Base URL of the Hub server, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_scanner_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1
}

fn default_notification_interval() -> u64 {
    30 * 60 // 30 minutes
}

fn default_settle_window() -> u64 {
    15
}

fn default_settle_poll() -> u64 {
    5
}

fn default_hub_port() -> u16 {
    443
}

fn default_hub_scheme() -> String {
    "https".to_string()
}

fn default_hub_user() -> String {
    "sysadmin".to_string()
}

fn default_hub_timeout() -> u64 {
    30
}

impl ArbiterConfig {
    /// Interval between notification sweeps.
    pub fn notification_interval(&self) -> Duration {
        Duration::from_secs(self.notification_interval_secs)
    }

    /// Quiet period that ends the initial load wait.
    pub fn settle_window(&self) -> Duration {
        Duration::from_secs(self.settle_window_secs)
    }

    /// Polling period of the initial load wait.
    pub fn settle_poll(&self) -> Duration {
        Duration::from_secs(self.settle_poll_secs)
    }

    /// Validate that the configuration can drive a running arbiter.
    pub fn validate(&self) -> Result<()> {
        if self.hub.host.trim().is_empty() {
            return Err(ArbiterError::Config("hub.host must be set".to_string()));
        }

        if !matches!(self.hub.scheme.as_str(), "http" | "https") {
            return Err(ArbiterError::Config(format!(
                "hub.scheme must be http or https, got '{}'",
                self.hub.scheme
            )));
        }

        if self.workers == 0 {
            return Err(ArbiterError::Config(
                "workers must be at least 1".to_string(),
            ));
        }

        if self.notification_interval_secs == 0 || self.settle_poll_secs == 0 {
            return Err(ArbiterError::Config(
                "notificationIntervalSecs and settlePollSecs must be non-zero".to_string(),
            ));
        }

        if self.settle_poll_secs > self.settle_window_secs {
            return Err(ArbiterError::Config(format!(
                "settlePollSecs ({}) must not exceed settleWindowSecs ({})",
                self.settle_poll_secs, self.settle_window_secs
            )));
        }

        Ok(())
    }

    /// Load configuration from a mounted file, then apply environment overrides.
    pub fn from_mounted_file(config_path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)?;
        let mut config: ArbiterConfig = serde_yaml::from_str(&config_str)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override Hub settings from `HUB_*` environment variables when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(ENV_HUB_HOST) {
            self.hub.host = host;
        }
        if let Ok(port) = std::env::var(ENV_HUB_PORT) {
            match port.parse::<u16>() {
                Ok(port) => self.hub.port = port,
                Err(e) => warn!("Ignoring invalid {ENV_HUB_PORT} value '{port}': {e}"),
            }
        }
        if let Ok(scheme) = std::env::var(ENV_HUB_SCHEME) {
            self.hub.scheme = scheme;
        }
        if let Ok(user) = std::env::var(ENV_HUB_USER) {
            self.hub.user = user;
        }
        if let Ok(password) = std::env::var(ENV_HUB_PASSWORD) {
            self.hub.password = password;
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_hub_port(),
            scheme: default_hub_scheme(),
            user: default_hub_user(),
            password: String::new(),
            timeout_secs: default_hub_timeout(),
        }
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            scanner_version: default_scanner_version(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            notification_interval_secs: default_notification_interval(),
            settle_window_secs: default_settle_window(),
            settle_poll_secs: default_settle_poll(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn configured() -> ArbiterConfig {
        let mut config = ArbiterConfig::default();
        config.hub.host = "hub.example.com".to_string();
        config
    }

    #[test]
    fn parses_minimal_yaml_with_defaults() {
        let yaml = "hub:\n  host: hub.example.com\n";
        let config: ArbiterConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.hub.host, "hub.example.com");
        assert_eq!(config.hub.port, 443);
        assert_eq!(config.hub.scheme, "https");
        assert_eq!(config.hub.user, "sysadmin");
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.notification_interval(), Duration::from_secs(1800));
        assert_eq!(config.settle_window(), Duration::from_secs(15));
        assert_eq!(config.settle_poll(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_camel_case_keys() {
        let yaml = r"
hub:
  host: hub.internal
  port: 8443
  scheme: http
  user: scanner
  password: s3cret
  timeoutSecs: 10
scannerVersion: 1.2.3
workers: 8
queueCapacity: 16
notificationIntervalSecs: 60
settleWindowSecs: 20
settlePollSecs: 2
";
        let config: ArbiterConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.hub.base_url(), "http://hub.internal:8443");
        assert_eq!(config.hub.timeout(), Duration::from_secs(10));
        assert_eq!(config.scanner_version, "1.2.3");
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.notification_interval_secs, 60);
        assert_eq!(config.settle_window_secs, 20);
        assert_eq!(config.settle_poll_secs, 2);
    }

    #[test]
    fn debug_output_redacts_password() {
        let mut config = configured();
        config.hub.password = "hunter2".to_string();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn validate_rejects_missing_host() {
        assert!(ArbiterConfig::default().validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = configured();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_scheme() {
        let mut config = configured();
        config.hub.scheme = "ftp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_poll_longer_than_window() {
        let mut config = configured();
        config.settle_poll_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_replace_hub_settings() {
        std::env::set_var(ENV_HUB_HOST, "override.example.com");
        std::env::set_var(ENV_HUB_PORT, "9443");
        std::env::set_var(ENV_HUB_PASSWORD, "from-secret");

        let mut config = configured();
        config.apply_env_overrides();

        std::env::remove_var(ENV_HUB_HOST);
        std::env::remove_var(ENV_HUB_PORT);
        std::env::remove_var(ENV_HUB_PASSWORD);

        assert_eq!(config.hub.host, "override.example.com");
        assert_eq!(config.hub.port, 9443);
        assert_eq!(config.hub.password, "from-secret");
        assert_eq!(config.hub.user, "sysadmin");
    }

    #[test]
    #[serial]
    fn env_override_ignores_invalid_port() {
        std::env::set_var(ENV_HUB_PORT, "not-a-port");

        let mut config = configured();
        config.apply_env_overrides();

        std::env::remove_var(ENV_HUB_PORT);

        assert_eq!(config.hub.port, 443);
    }

    #[test]
    #[serial]
    fn from_mounted_file_reports_missing_file() {
        let result = ArbiterConfig::from_mounted_file("/nonexistent/arbiter/config.yaml");
        assert!(matches!(result, Err(ArbiterError::Io(_))));
    }
}
