// Configuration File Support
//
// This module provides configuration file parsing for pg-elevate.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/pg-elevate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for capability probes
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 3;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingSection,

    /// Execution defaults
    pub execution: ExecutionConfig,

    /// Target service description
    pub service: ServiceConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (plain, json)
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

/// Execution defaults applied when the caller doesn't override them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,

    /// Attempts per strategy
    pub max_retries: u32,

    /// Fixed delay between attempts in milliseconds
    pub retry_backoff_ms: u64,

    /// Timeout for capability probes in seconds
    pub probe_timeout_secs: u64,

    /// Whether the interactive elevation tier may be used
    pub allow_interactive: bool,

    /// Output ceiling per stream in bytes
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 2000,
            probe_timeout_secs: MAX_PROBE_TIMEOUT_SECS,
            allow_interactive: false,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Target service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// OS account owning the database server
    pub account: String,

    /// Client used for probes
    pub client: String,

    /// Programs run as the service account when elevated
    pub client_tools: Vec<String>,

    /// Service manager unit name
    pub service_name: String,

    /// Access-control file path (located automatically if unset)
    pub hba_path: Option<String>,

    /// Privilege-elevation tool
    pub elevation_tool: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            account: "postgres".to_string(),
            client: "psql".to_string(),
            client_tools: [
                "psql",
                "createdb",
                "dropdb",
                "createuser",
                "dropuser",
                "pg_dump",
                "pg_restore",
                "pg_dumpall",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            service_name: "postgresql".to_string(),
            hba_path: None,
            elevation_tool: "sudo".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::debug!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/pg-elevate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("org", "pg-elevate", "pg-elevate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("pg-elevate")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - PG_ELEVATE_LOG_LEVEL
    /// - PG_ELEVATE_LOG_FORMAT
    /// - PG_ELEVATE_TIMEOUT_SECS
    /// - PG_ELEVATE_MAX_RETRIES
    /// - PG_ELEVATE_ALLOW_INTERACTIVE
    /// - PG_ELEVATE_SERVICE_ACCOUNT
    /// - PG_ELEVATE_HBA_PATH
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("PG_ELEVATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PG_ELEVATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(timeout) = std::env::var("PG_ELEVATE_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.execution.timeout_secs = timeout;
                }
            }
        }
        if let Ok(retries) = std::env::var("PG_ELEVATE_MAX_RETRIES") {
            if let Ok(retries) = retries.parse::<u32>() {
                if retries >= 1 {
                    self.execution.max_retries = retries;
                }
            }
        }
        if let Ok(allow) = std::env::var("PG_ELEVATE_ALLOW_INTERACTIVE") {
            self.execution.allow_interactive =
                allow.parse().unwrap_or(self.execution.allow_interactive);
        }

        if let Ok(account) = std::env::var("PG_ELEVATE_SERVICE_ACCOUNT") {
            if !account.is_empty() {
                self.service.account = account;
            }
        }
        if let Ok(path) = std::env::var("PG_ELEVATE_HBA_PATH") {
            self.service.hba_path = Some(path);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "plain" | "json" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: plain, json",
                self.logging.format
            ),
        }

        if self.execution.timeout_secs == 0 {
            anyhow::bail!("Execution timeout must be > 0");
        }
        if self.execution.max_retries == 0 {
            anyhow::bail!("max_retries must be >= 1");
        }
        if self.execution.probe_timeout_secs == 0 {
            anyhow::bail!("Probe timeout must be > 0");
        }
        if self.execution.probe_timeout_secs > MAX_PROBE_TIMEOUT_SECS {
            anyhow::bail!(
                "Probe timeout must be <= {} seconds",
                MAX_PROBE_TIMEOUT_SECS
            );
        }
        if self.execution.probe_timeout_secs > self.execution.timeout_secs {
            anyhow::bail!("Probe timeout must not exceed the execution timeout");
        }
        if self.execution.max_output_bytes == 0 {
            anyhow::bail!("max_output_bytes must be > 0");
        }

        if self.service.account.is_empty() {
            anyhow::bail!("Service account must not be empty");
        }
        if self.service.client.is_empty() {
            anyhow::bail!("Service client must not be empty");
        }
        if self.service.elevation_tool.is_empty() {
            anyhow::bail!("Elevation tool must not be empty");
        }

        Ok(())
    }
}
