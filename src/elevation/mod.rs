//! Privilege Elevation
//!
//! Strategy selection machinery: every privileged command is funneled through
//! an [`AdaptiveExecutor`], which walks a [`StrategyCatalog`] from least to
//! most invasive and remembers the winner per command class in a
//! [`StrategyCache`].
//!
//! # Example
//!
//! ```no_run
//! use pg_elevate::command::Command;
//! use pg_elevate::elevation::{AdaptiveExecutor, StrategyCatalog};
//! use pg_elevate::runner::{BoundedRunner, ExecutionPolicy};
//! use pg_elevate::target::ServiceTarget;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = Arc::new(BoundedRunner::new());
//!     let target = ServiceTarget::default();
//!     let catalog = StrategyCatalog::standard(runner.clone(), &target, Duration::from_secs(3));
//!     let mut executor = AdaptiveExecutor::new(catalog, runner);
//!
//!     let policy = ExecutionPolicy::labeled("list databases");
//!     let result = executor.execute(&Command::new("psql -l"), &policy).await?;
//!     println!("{}", result.stdout);
//!     Ok(())
//! }
//! ```

mod cache;
mod catalog;
mod executor;
mod strategy;

pub use cache::{CacheEntry, StrategyCache};
pub use catalog::StrategyCatalog;
pub use executor::{AdaptiveExecutor, DEFAULT_RETRY_BACKOFF};
pub use strategy::{
    elevate, looks_like_permission_denied, shell_quote, terminal_attached, CachedSessionStrategy,
    DirectStrategy, ImplicitStrategy, InteractiveStrategy, Strategy, CACHED_SESSION, DIRECT,
    IMPLICIT, INTERACTIVE,
};
