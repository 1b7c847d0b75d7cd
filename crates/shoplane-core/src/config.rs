//! Shoplane configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ShoplaneError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShoplaneConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl ShoplaneConfig {
    /// Load config from the default path (~/.shoplane/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShoplaneError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ShoplaneError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ShoplaneError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Shoplane home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shoplane")
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    9080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Cron tick configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Shared secret for the scheduler's HMAC signature. Empty disables
    /// auth; the gateway refuses to start that way unless
    /// `SHOPLANE_ALLOW_UNSIGNED_CRON` is set (local development only).
    #[serde(default)]
    pub secret: String,
    /// Max scheduled runs drained per tick.
    #[serde(default = "default_run_batch")]
    pub run_batch_size: usize,
    /// Max abandoned carts scanned per store per tick.
    #[serde(default = "default_cart_batch")]
    pub cart_batch_size: usize,
    /// Runs stuck in `running` longer than this are reclaimed on the next
    /// tick. Must stay above the largest handler timeout.
    #[serde(default = "default_stale_minutes")]
    pub stale_running_minutes: i64,
}

fn default_run_batch() -> usize {
    100
}
fn default_cart_batch() -> usize {
    50
}
fn default_stale_minutes() -> i64 {
    15
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            run_batch_size: default_run_batch(),
            cart_batch_size: default_cart_batch(),
            stale_running_minutes: default_stale_minutes(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "~/.shoplane/shoplane.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Expand a leading `~/` against the home directory.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest)
        } else {
            PathBuf::from(&self.path)
        }
    }
}

/// SMTP sending configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            email: String::new(),
            password: String::new(),
            display_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ShoplaneConfig::default();
        assert_eq!(config.cron.run_batch_size, 100);
        assert_eq!(config.cron.cart_batch_size, 50);
        assert_eq!(config.server.port, 9080);
    }

    #[test]
    fn test_partial_toml() {
        let config: ShoplaneConfig = toml::from_str(
            r#"
            [cron]
            secret = "s3cret"
            run_batch_size = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.cron.secret, "s3cret");
        assert_eq!(config.cron.run_batch_size, 25);
        // untouched sections keep their defaults
        assert_eq!(config.cron.cart_batch_size, 50);
        assert_eq!(config.smtp.port, 587);
    }
}
