//! Adaptive Executor
//!
//! Runs a command through the first strategy that works, remembering the
//! winner per command class:
//!
//! 1. If the class has a cached strategy, replay it. On failure the entry is
//!    removed and the catalog is walked from the top.
//! 2. Walk the catalog in order, skipping interactive tiers unless the policy
//!    allows prompts. Probe each; attempt the capable ones with bounded retries.
//! 3. Cache the first success. If nothing succeeds, return
//!    `NoCapableStrategy` carrying every outcome and the last error.
//!
//! One attempt runs at a time. `execute` takes `&mut self`, so a single
//! executor (and its cache) cannot be driven concurrently.

use super::cache::StrategyCache;
use super::catalog::StrategyCatalog;
use super::strategy::{looks_like_permission_denied, Strategy};
use crate::command::Command;
use crate::error::{ElevateError, Result, StrategyOutcome};
use crate::runner::{ExecutionPolicy, ExecutionResult, ProcessRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Fixed delay between attempts of one strategy
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

const INCAPABLE: &str = "probe reported incapable";
const PROMPTS_DISALLOWED: &str = "skipped (interactive prompts not allowed)";

pub struct AdaptiveExecutor {
    catalog: StrategyCatalog,
    runner: Arc<dyn ProcessRunner>,
    cache: StrategyCache,
    retry_backoff: Duration,
}

impl std::fmt::Debug for AdaptiveExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveExecutor")
            .field("catalog", &self.catalog)
            .field("cache", &self.cache)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl AdaptiveExecutor {
    pub fn new(catalog: StrategyCatalog, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            catalog,
            runner,
            cache: StrategyCache::new(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn catalog(&self) -> &StrategyCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &StrategyCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Run `command` under `policy` with the first strategy that works
    ///
    /// # Errors
    ///
    /// Returns `NoCapableStrategy` once every eligible strategy was incapable
    /// or failed. Its message names the policy's operation label and the last
    /// underlying error.
    pub async fn execute(
        &mut self,
        command: &Command,
        policy: &ExecutionPolicy,
    ) -> Result<ExecutionResult> {
        let key = command.class().clone();
        let mut outcomes: Vec<StrategyOutcome> = Vec::new();
        let mut last_error: Option<ElevateError> = None;

        if let Some(entry) = self.cache.get(&key) {
            let name = entry.strategy_name.clone();
            match self.catalog.get(&name).cloned() {
                Some(strategy) => {
                    debug!("Cache hit for class '{}': {}", key, name);
                    match self
                        .attempt_with_retries(strategy.as_ref(), command, policy)
                        .await
                    {
                        Ok(result) => return Ok(result),
                        Err(e) => {
                            warn!(
                                "Cached strategy '{}' failed for class '{}', re-probing: {}",
                                name, key, e
                            );
                            self.cache.invalidate(&key);
                            outcomes.push(StrategyOutcome {
                                strategy: format!("{} (cached)", name),
                                detail: e.to_string(),
                            });
                            last_error = Some(e);
                        }
                    }
                }
                None => {
                    debug!("Cached strategy '{}' is not in the catalog, evicting", name);
                    self.cache.invalidate(&key);
                }
            }
        } else {
            debug!("Cache miss for class '{}'", key);
        }

        let strategies: Vec<Arc<dyn Strategy>> = self.catalog.iter().cloned().collect();
        for strategy in strategies {
            let name = strategy.name().to_string();

            if strategy.requires_interactive() && !policy.allow_interactive_prompt() {
                debug!("Skipping '{}': interactive prompts not allowed", name);
                outcomes.push(StrategyOutcome {
                    strategy: name,
                    detail: PROMPTS_DISALLOWED.to_string(),
                });
                continue;
            }

            let capable = strategy.probe().await;
            debug!("Probe '{}': capable={}", name, capable);
            if !capable {
                outcomes.push(StrategyOutcome {
                    strategy: name,
                    detail: INCAPABLE.to_string(),
                });
                continue;
            }

            match self
                .attempt_with_retries(strategy.as_ref(), command, policy)
                .await
            {
                Ok(result) => {
                    info!(
                        "{}: using strategy '{}' for class '{}'",
                        policy.operation_label(),
                        name,
                        key
                    );
                    self.cache.record(key, name);
                    return Ok(result);
                }
                Err(e) => {
                    outcomes.push(StrategyOutcome {
                        strategy: name,
                        detail: e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        error!(
            "{}: all elevation strategies exhausted for class '{}'",
            policy.operation_label(),
            key
        );
        Err(ElevateError::NoCapableStrategy {
            operation: policy.operation_label().to_string(),
            outcomes,
            last_error: last_error.map(Box::new),
            remediation: self.catalog.manual_equivalent(command),
        })
    }

    /// Run one strategy's rewrite of `command` at most `max_retries` times
    ///
    /// A timeout ends the attempts for this strategy: it most likely means the
    /// command is sitting at a prompt, and an identical retry would sit there
    /// too. A permission failure ends them for the same reason.
    async fn attempt_with_retries(
        &self,
        strategy: &dyn Strategy,
        command: &Command,
        policy: &ExecutionPolicy,
    ) -> Result<ExecutionResult> {
        let transformed = strategy.transform(command);
        let max = policy.max_retries();
        let mut last_error = None;

        for attempt in 1..=max {
            debug!(
                "Attempt {}/{} with '{}': {}",
                attempt,
                max,
                strategy.name(),
                transformed
            );

            let run = if strategy.requires_interactive() {
                self.runner.run_attached(transformed.text(), policy.timeout())
            } else {
                self.runner.run(transformed.text(), policy.timeout())
            };

            match run.await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            "Strategy '{}' succeeded on attempt {}",
                            strategy.name(),
                            attempt
                        );
                    }
                    return Ok(result);
                }
                Err(e) if e.is_timeout() => {
                    warn!(
                        "Strategy '{}' timed out after {:?}, possibly waiting on an interactive prompt; not retrying",
                        strategy.name(),
                        policy.timeout()
                    );
                    return Err(e);
                }
                Err(e) => {
                    if is_permission_failure(&e) {
                        warn!(
                            "Strategy '{}' was refused permission, not retrying: {}",
                            strategy.name(),
                            e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Strategy '{}' attempt {}/{} failed: {}",
                        strategy.name(),
                        attempt,
                        max,
                        e
                    );
                    last_error = Some(e);
                    if attempt < max {
                        sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ElevateError::InvalidPolicy("max_retries must be at least 1".to_string())
        }))
    }
}

fn is_permission_failure(err: &ElevateError) -> bool {
    match err {
        ElevateError::ProcessError { message, .. } => looks_like_permission_denied(message),
        _ => false,
    }
}
