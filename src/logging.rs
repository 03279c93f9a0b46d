//! Logging Configuration
//!
//! Structured logging with configurable level and plain or JSON output.
//! Log lines go to stderr so command output on stdout stays machine-readable.

use crate::config::LoggingSection;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log format configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plain text format
    #[default]
    Plain,
    /// JSON structured format
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Log level configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,

    /// Include file and line number in logs
    pub file_and_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Plain,
            file_and_line: false,
        }
    }
}

impl LoggingConfig {
    /// Build from the `[logging]` config section; `verbose` forces debug
    ///
    /// Unknown values fall back to the defaults. `Config::validate` has
    /// already rejected them for loaded files.
    pub fn from_section(section: &LoggingSection, verbose: bool) -> Self {
        let level = if verbose {
            LogLevel::Debug
        } else {
            section.level.parse().unwrap_or_default()
        };

        Self {
            level,
            format: section.format.parse().unwrap_or_default(),
            file_and_line: verbose,
        }
    }

    /// Initialize the global subscriber; `RUST_LOG` overrides the level
    pub fn init(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()));

        match self.format {
            LogFormat::Plain => {
                let layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(self.file_and_line)
                    .with_line_number(self.file_and_line)
                    .with_target(false)
                    .with_filter(filter);

                tracing_subscriber::registry().with(layer).try_init()?;
            }
            LogFormat::Json => {
                let layer = fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(self.file_and_line)
                    .with_line_number(self.file_and_line)
                    .with_target(true)
                    .with_filter(filter);

                tracing_subscriber::registry().with(layer).try_init()?;
            }
        }

        tracing::debug!(
            "Logging initialized: level={}, format={:?}",
            self.level,
            self.format
        );

        Ok(())
    }
}
