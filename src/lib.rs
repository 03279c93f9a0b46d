//! pg-elevate Library
//!
//! Adaptive privileged-command execution for administering a local database
//! service. Commands are run through the least invasive elevation strategy
//! that works on the host, the winner is remembered per command class, and
//! the service's authentication modes can be detected and (with explicit
//! confirmation) reconfigured.

pub mod auth;
pub mod command;
pub mod config;
pub mod elevation;
pub mod error;
pub mod logging;
pub mod runner;
pub mod target;

pub use error::{ElevateError, Result};
