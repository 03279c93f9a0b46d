//! Strategy Catalog
//!
//! Ordered, append-only list of strategies. Order is preference: when several
//! strategies are capable, the earliest wins.

use super::strategy::{
    CachedSessionStrategy, DirectStrategy, ImplicitStrategy, InteractiveStrategy, Strategy,
};
use crate::command::Command;
use crate::error::{ElevateError, Result};
use crate::runner::ProcessRunner;
use crate::target::ServiceTarget;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default, Clone)]
pub struct StrategyCatalog {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl std::fmt::Debug for StrategyCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl StrategyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in tiers for `target`: direct, implicit, cached-session,
    /// interactive
    pub fn standard(
        runner: Arc<dyn ProcessRunner>,
        target: &ServiceTarget,
        probe_timeout: Duration,
    ) -> Self {
        let strategies: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(DirectStrategy::new(runner.clone(), target.clone(), probe_timeout)),
            Arc::new(ImplicitStrategy::new(runner.clone(), target.clone(), probe_timeout)),
            Arc::new(CachedSessionStrategy::new(
                runner.clone(),
                target.clone(),
                probe_timeout,
            )),
            Arc::new(InteractiveStrategy::new(runner, target.clone(), probe_timeout)),
        ];
        Self { strategies }
    }

    /// Append a strategy at the lowest preference
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStrategy` if the name is taken.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<()> {
        if self.get(strategy.name()).is_some() {
            return Err(ElevateError::DuplicateStrategy(strategy.name().to_string()));
        }
        self.strategies.push(strategy);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, strategy: Arc<dyn Strategy>) -> Result<Self> {
        self.register(strategy)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> {
        self.strategies.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// The command a user could run by hand: the most invasive tier's rewrite
    pub fn manual_equivalent(&self, command: &Command) -> String {
        self.strategies
            .last()
            .map(|s| s.transform(command).text().to_string())
            .unwrap_or_else(|| command.text().to_string())
    }
}
