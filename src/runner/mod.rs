//! Process Execution Subsystem
//!
//! Every external command the engine issues goes through a [`ProcessRunner`]
//! with an explicit deadline. There is no unbounded wait anywhere.
//!
//! # Architecture
//!
//! - `process.rs`: the [`ProcessRunner`] seam and the tokio-backed [`BoundedRunner`]
//! - `policy.rs`: per-call [`ExecutionPolicy`]
//!
//! # Example
//!
//! ```no_run
//! use pg_elevate::runner::{BoundedRunner, ProcessRunner};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = BoundedRunner::new();
//!     let result = runner.run("psql --version", Duration::from_secs(5)).await?;
//!     println!("{}", result.stdout);
//!     Ok(())
//! }
//! ```

mod policy;
mod process;

pub use policy::{ExecutionPolicy, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
pub use process::{BoundedRunner, ExecutionResult, ProcessRunner, RunnerConfig, MAX_OUTPUT_SIZE};
