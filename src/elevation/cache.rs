//! Strategy Cache
//!
//! Remembers which strategy last succeeded for each command class. Lives only
//! as long as the owning executor; nothing is written to disk.

use crate::command::CommandClass;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A remembered winning strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CommandClass,
    pub strategy_name: String,
    pub recorded_at: DateTime<Utc>,
}

/// Command class -> last successful strategy
#[derive(Debug, Default)]
pub struct StrategyCache {
    entries: HashMap<CommandClass, CacheEntry>,
}

impl StrategyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CommandClass) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CommandClass) -> bool {
        self.entries.contains_key(key)
    }

    /// Record `strategy_name` as the winner for `key`, replacing any entry
    pub(crate) fn record(&mut self, key: CommandClass, strategy_name: impl Into<String>) {
        let entry = CacheEntry {
            key: key.clone(),
            strategy_name: strategy_name.into(),
            recorded_at: Utc::now(),
        };
        self.entries.insert(key, entry);
    }

    /// Drop the entry for `key`. Entries are never repaired in place.
    pub(crate) fn invalidate(&mut self, key: &CommandClass) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }
}
