//! Configuration management for the Sentinel background host.
//!
//! This module handles loading, validation, and conversion of host configuration
//! from TOML files and command-line arguments.

use sentinel_messaging::origin_of;
use sentinel_premium::LicenseSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn default_check_period_secs() -> u64 {
    24 * 60 * 60
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Application configuration loaded from TOML file.
///
/// Covers the messaging bridge, the Premium license checks and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host configuration settings
    pub host: HostSettings,
    /// Premium license settings
    pub premium: PremiumSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Where the bridge listens and which origin counts as the extension itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Network address to bind the bridge to (e.g., "127.0.0.1:8090")
    pub bind_address: String,
    /// Origin of the extension's own pages, e.g. "chrome-extension://sentinel"
    pub extension_origin: String,
}

/// Premium license configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumSettings {
    /// Endpoint the license checks are POSTed to
    pub license_check_url: String,
    /// Origin allowed to send `premium.activate`
    pub activation_origin: String,
    /// File the user preferences are kept in
    pub prefs_path: String,
    /// Seconds between regular license checks
    #[serde(default = "default_check_period_secs")]
    pub check_period_secs: u64,
    /// Seconds between retries after a failed check
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Timeout of a single license request in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: HostSettings {
                bind_address: "127.0.0.1:8090".to_string(),
                extension_origin: "chrome-extension://sentinel".to_string(),
            },
            premium: PremiumSettings {
                license_check_url: sentinel_premium::prefs::DEFAULT_LICENSE_CHECK_URL.to_string(),
                activation_origin: sentinel_premium::prefs::DEFAULT_ACTIVATION_ORIGIN.to_string(),
                prefs_path: "data/prefs.json".to_string(),
                check_period_secs: default_check_period_secs(),
                retry_delay_secs: default_retry_delay_secs(),
                request_timeout_secs: default_request_timeout_secs(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    pub async fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Timing of the license checks.
    pub fn license_settings(&self) -> LicenseSettings {
        LicenseSettings {
            check_period: Duration::from_secs(self.premium.check_period_secs),
            retry_delay: Duration::from_secs(self.premium.retry_delay_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.premium.request_timeout_secs)
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.host.bind_address));
        }

        if self.host.extension_origin.is_empty() {
            return Err("Extension origin cannot be empty".to_string());
        }
        if origin_of(&self.host.extension_origin).is_none() {
            return Err(format!(
                "Invalid extension origin: {}",
                &self.host.extension_origin
            ));
        }

        if self.premium.activation_origin.is_empty() {
            return Err("Activation origin cannot be empty".to_string());
        }
        if self.premium.license_check_url.is_empty() {
            return Err("License check URL cannot be empty".to_string());
        }
        if self.premium.prefs_path.is_empty() {
            return Err("Prefs path cannot be empty".to_string());
        }
        if self.premium.check_period_secs == 0 || self.premium.retry_delay_secs == 0 {
            return Err("License check period and retry delay must be positive".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.host.bind_address, "127.0.0.1:8090");
        assert_eq!(config.host.extension_origin, "chrome-extension://sentinel");
        assert_eq!(config.premium.check_period_secs, 86400);
        assert_eq!(config.premium.retry_delay_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.host.bind_address, "127.0.0.1:8090");

        // Should create the file
        assert!(path.exists());
        let written = fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("[premium]"));
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[host]
bind_address = "0.0.0.0:9100"
extension_origin = "moz-extension://0b1c2d"

[premium]
license_check_url = "https://licensing.example.org/license"
activation_origin = "https://accounts.example.org"
prefs_path = "/tmp/prefs.json"
retry_delay_secs = 5

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(config.host.bind_address, "0.0.0.0:9100");
        assert_eq!(config.host.extension_origin, "moz-extension://0b1c2d");
        assert_eq!(config.premium.activation_origin, "https://accounts.example.org");
        assert_eq!(config.premium.retry_delay_secs, 5);
        // Missing fields fall back to their defaults
        assert_eq!(config.premium.check_period_secs, 86400);
        assert_eq!(config.premium.request_timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        let settings = config.license_settings();
        assert_eq!(settings.check_period, Duration::from_secs(86400));
        assert_eq!(settings.retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.host.bind_address = "invalid_address".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_origins() {
        let mut config = AppConfig::default();
        config.host.extension_origin = "".to_string();
        assert!(config.validate().unwrap_err().contains("Extension origin cannot be empty"));

        config.host.extension_origin = "not an origin".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid extension origin"));

        config.host.extension_origin = "chrome-extension://sentinel".to_string();
        config.premium.activation_origin = "".to_string();
        assert!(config.validate().unwrap_err().contains("Activation origin cannot be empty"));
    }

    #[test]
    fn test_validation_zero_periods() {
        let mut config = AppConfig::default();
        config.premium.retry_delay_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_levels() {
        let mut config = AppConfig::default();
        config.logging.level = "invalid_level".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));

        for level in ["trace", "debug", "info", "warn", "error"] {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Level '{}' should be valid", level);
        }
    }
}
