//! Engine Error Types
//!
//! Every failure the engine can surface to its caller. `TimeoutExceeded` and
//! `ProcessError` are recovered inside the executor by advancing to the next
//! strategy; `NoCapableStrategy` and `ConfigurationEditFailed` always reach the
//! caller.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ElevateError>;

/// Outcome of one catalog entry during an `execute` call, kept for the
/// aggregated failure message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    /// Strategy name
    pub strategy: String,

    /// What happened ("probe reported incapable", or the error text)
    pub detail: String,
}

impl std::fmt::Display for StrategyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.strategy, self.detail)
    }
}

/// Error types for privileged execution
#[derive(Debug, thiserror::Error)]
pub enum ElevateError {
    /// The process did not exit before its deadline
    #[error("Command timed out after {timeout:?} (possible interactive prompt): {command}")]
    TimeoutExceeded { command: String, timeout: Duration },

    /// The process ran and exited with failure, or could not be spawned
    #[error("Command failed (exit code: {exit_code:?}): {message}")]
    ProcessError {
        command: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// Every catalog entry was incapable or failed after retries
    #[error("{operation}: no elevation strategy succeeded ({}){}", format_outcomes(.outcomes), format_last(.last_error))]
    NoCapableStrategy {
        operation: String,
        outcomes: Vec<StrategyOutcome>,
        last_error: Option<Box<ElevateError>>,
        remediation: String,
    },

    /// An access-control reconfiguration failed part way through
    #[error("Configuration edit failed at {stage}: {message}{}", format_backup(.backup))]
    ConfigurationEditFailed {
        stage: EditStage,
        message: String,
        backup: Option<PathBuf>,
    },

    /// Rejected execution policy
    #[error("Invalid execution policy: {0}")]
    InvalidPolicy(String),

    /// A strategy name is already registered in the catalog
    #[error("Strategy '{0}' is already registered")]
    DuplicateStrategy(String),
}

/// Where in a reconfiguration the failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStage {
    Locate,
    Read,
    Backup,
    Write,
    Restart,
    Verify,
    Confirmation,
}

impl std::fmt::Display for EditStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            Self::Locate => "locate",
            Self::Read => "read",
            Self::Backup => "backup",
            Self::Write => "write",
            Self::Restart => "restart",
            Self::Verify => "verify",
            Self::Confirmation => "confirmation",
        };
        f.write_str(stage)
    }
}

fn format_outcomes(outcomes: &[StrategyOutcome]) -> String {
    if outcomes.is_empty() {
        return "no strategy was eligible".to_string();
    }
    outcomes
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_last(last: &Option<Box<ElevateError>>) -> String {
    match last {
        Some(err) => format!(". Last error: {}", err),
        None => String::new(),
    }
}

fn format_backup(backup: &Option<PathBuf>) -> String {
    match backup {
        Some(path) => format!(" (original saved at {})", path.display()),
        None => String::new(),
    }
}

impl ElevateError {
    /// True for the two kinds the executor recovers from locally
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. } | Self::ProcessError { .. })
    }

    /// True when the deadline was hit
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }

    /// Manual command the user can run instead, when one is known
    pub fn remediation(&self) -> Option<&str> {
        match self {
            Self::NoCapableStrategy { remediation, .. } if !remediation.is_empty() => {
                Some(remediation.as_str())
            }
            _ => None,
        }
    }

    /// Build a spawn failure as a `ProcessError`
    pub(crate) fn spawn(command: &str, err: std::io::Error) -> Self {
        Self::ProcessError {
            command: command.to_string(),
            exit_code: None,
            message: format!("Failed to spawn process: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_capable_strategy_message_includes_label_and_last_error() {
        let err = ElevateError::NoCapableStrategy {
            operation: "create database".to_string(),
            outcomes: vec![
                StrategyOutcome {
                    strategy: "direct".to_string(),
                    detail: "probe reported incapable".to_string(),
                },
                StrategyOutcome {
                    strategy: "implicit".to_string(),
                    detail: "exit 1".to_string(),
                },
            ],
            last_error: Some(Box::new(ElevateError::ProcessError {
                command: "psql".to_string(),
                exit_code: Some(1),
                message: "role does not exist".to_string(),
            })),
            remediation: "sudo -u postgres psql".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.starts_with("create database"));
        assert!(msg.contains("direct: probe reported incapable"));
        assert!(msg.contains("implicit: exit 1"));
        assert!(msg.contains("role does not exist"));
        assert_eq!(err.remediation(), Some("sudo -u postgres psql"));
    }

    #[test]
    fn test_recoverable_kinds() {
        let timeout = ElevateError::TimeoutExceeded {
            command: "sleep 10".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_recoverable());
        assert!(timeout.is_timeout());

        let edit = ElevateError::ConfigurationEditFailed {
            stage: EditStage::Verify,
            message: "probe failed".to_string(),
            backup: Some(PathBuf::from("/tmp/pg_hba.conf.bak.1")),
        };
        assert!(!edit.is_recoverable());
        assert!(edit.to_string().contains("/tmp/pg_hba.conf.bak.1"));
        assert!(edit.to_string().contains("verify"));
    }

    #[test]
    fn test_empty_outcomes_message() {
        let err = ElevateError::NoCapableStrategy {
            operation: "op".to_string(),
            outcomes: vec![],
            last_error: None,
            remediation: String::new(),
        };
        assert!(err.to_string().contains("no strategy was eligible"));
        assert!(err.remediation().is_none());
    }
}
