//! Execution Policy
//!
//! Per-call limits handed to the adaptive executor: the deadline for each
//! process run, how many times one strategy may be attempted, whether an
//! interactive credential prompt is acceptable, and a label for diagnostics.

use crate::error::{ElevateError, Result};
use std::time::Duration;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default attempts per strategy
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Execution policy for one `execute` call
///
/// Invariants: `timeout > 0` and `max_retries >= 1`. Both are checked at
/// construction, so a policy in hand is always valid.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPolicy {
    timeout: Duration,
    max_retries: u32,
    allow_interactive_prompt: bool,
    operation_label: String,
}

impl ExecutionPolicy {
    /// Create a new execution policy
    ///
    /// # Arguments
    ///
    /// * `operation_label` - Human-readable name of the operation, used in errors
    /// * `timeout` - Deadline for each process run
    /// * `max_retries` - Maximum runs per strategy
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use pg_elevate::runner::ExecutionPolicy;
    ///
    /// let policy = ExecutionPolicy::new("create database", Duration::from_secs(30), 2).unwrap();
    /// assert!(!policy.allow_interactive_prompt());
    /// ```
    pub fn new(
        operation_label: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        if timeout.is_zero() {
            return Err(ElevateError::InvalidPolicy(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if max_retries == 0 {
            return Err(ElevateError::InvalidPolicy(
                "max_retries must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            timeout,
            max_retries,
            allow_interactive_prompt: false,
            operation_label: operation_label.into(),
        })
    }

    /// Policy with the default timeout and retry count
    pub fn labeled(operation_label: impl Into<String>) -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            allow_interactive_prompt: false,
            operation_label: operation_label.into(),
        }
    }

    /// Permit (or forbid) the interactive elevation tier
    pub fn with_interactive_prompt(mut self, allow: bool) -> Self {
        self.allow_interactive_prompt = allow;
        self
    }

    /// Same limits under a different label
    pub fn with_operation_label(mut self, label: impl Into<String>) -> Self {
        self.operation_label = label.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn allow_interactive_prompt(&self) -> bool {
        self.allow_interactive_prompt
    }

    pub fn operation_label(&self) -> &str {
        &self.operation_label
    }
}
