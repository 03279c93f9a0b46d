//! Elevation Strategies
//!
//! A strategy is a named way of getting enough privilege to run a command: a
//! cheap capability probe plus a transform that rewrites the command for that
//! mechanism. The four built-in tiers, least invasive first:
//!
//! | name             | transform         | probe                                   |
//! |------------------|-------------------|-----------------------------------------|
//! | `direct`         | unchanged         | client no-op succeeds as current user   |
//! | `implicit`       | `sudo -n ...`     | `sudo -n true` succeeds                 |
//! | `cached-session` | `sudo -n ...`     | elevation tool is installed             |
//! | `interactive`    | `sudo ...`        | terminal attached and tool installed    |

use crate::command::Command;
use crate::runner::ProcessRunner;
use crate::target::ServiceTarget;
use async_trait::async_trait;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DIRECT: &str = "direct";
pub const IMPLICIT: &str = "implicit";
pub const CACHED_SESSION: &str = "cached-session";
pub const INTERACTIVE: &str = "interactive";

/// A privilege-elevation strategy
///
/// Implementations are immutable once registered in a catalog.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Unique name within a catalog
    fn name(&self) -> &str;

    /// Cheap, side-effect-free check of whether this strategy is likely to work
    async fn probe(&self) -> bool;

    /// Rewrite `command` for this strategy. Must not double-wrap a command
    /// that is already elevated.
    fn transform(&self, command: &Command) -> Command;

    /// Whether this strategy may prompt for credentials
    fn requires_interactive(&self) -> bool {
        false
    }
}

/// Wrap `command` with the elevation tool
///
/// Service tools run as the service account (`sudo -u postgres psql ...`);
/// anything else runs through a root shell (`sudo sh -c '...'`). A command
/// whose program already is the elevation tool is returned unchanged.
pub fn elevate(command: &Command, target: &ServiceTarget, non_interactive: bool) -> Command {
    let program = match command.program() {
        Some(program) => program,
        None => return command.clone(),
    };

    if program == target.elevation_tool {
        return command.clone();
    }

    let flag = if non_interactive { " -n" } else { "" };
    let text = if target.is_client_tool(program) {
        format!(
            "{}{} -u {} {}",
            target.elevation_tool,
            flag,
            target.account,
            command.text().trim()
        )
    } else {
        format!(
            "{}{} sh -c {}",
            target.elevation_tool,
            flag,
            shell_quote(command.text().trim())
        )
    };
    command.rewrite(text)
}

/// Single-quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Heuristic for permission/authentication failures in client output
///
/// A missing role only counts when the server refused the connection
/// (`FATAL:`); the same text at `ERROR:` level is an ordinary statement
/// failure such as dropping a role that is already gone.
pub fn looks_like_permission_denied(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("must be superuser")
        || lower.contains("operation not permitted")
        || lower.contains("a password is required")
        || lower.contains("access denied")
        || lower.contains("interactive authentication required")
        || lower.contains("not authorized")
        || (lower.contains("fatal:") && lower.contains("role") && lower.contains("does not exist"))
}

/// Shared probe machinery for the built-in strategies
#[derive(Clone)]
struct ProbeContext {
    runner: Arc<dyn ProcessRunner>,
    target: ServiceTarget,
    timeout: Duration,
}

impl ProbeContext {
    async fn succeeds(&self, probe: &str) -> bool {
        match self.runner.run(probe, self.timeout).await {
            Ok(result) => !looks_like_permission_denied(&result.stderr),
            Err(e) => {
                debug!("Probe `{}` failed: {}", probe, e);
                false
            }
        }
    }

    async fn tool_installed(&self) -> bool {
        self.succeeds(&format!("command -v {}", self.target.elevation_tool))
            .await
    }
}

/// Run the command as the invoking user
pub struct DirectStrategy {
    ctx: ProbeContext,
}

impl DirectStrategy {
    pub fn new(runner: Arc<dyn ProcessRunner>, target: ServiceTarget, probe_timeout: Duration) -> Self {
        Self {
            ctx: ProbeContext {
                runner,
                target,
                timeout: probe_timeout,
            },
        }
    }
}

#[async_trait]
impl Strategy for DirectStrategy {
    fn name(&self) -> &str {
        DIRECT
    }

    async fn probe(&self) -> bool {
        self.ctx.succeeds(&self.ctx.target.client_probe()).await
    }

    fn transform(&self, command: &Command) -> Command {
        command.clone()
    }
}

/// Non-interactive elevation, capable when `sudo -n true` works
pub struct ImplicitStrategy {
    ctx: ProbeContext,
}

impl ImplicitStrategy {
    pub fn new(runner: Arc<dyn ProcessRunner>, target: ServiceTarget, probe_timeout: Duration) -> Self {
        Self {
            ctx: ProbeContext {
                runner,
                target,
                timeout: probe_timeout,
            },
        }
    }
}

#[async_trait]
impl Strategy for ImplicitStrategy {
    fn name(&self) -> &str {
        IMPLICIT
    }

    async fn probe(&self) -> bool {
        self.ctx
            .succeeds(&format!("{} -n true", self.ctx.target.elevation_tool))
            .await
    }

    fn transform(&self, command: &Command) -> Command {
        elevate(command, &self.ctx.target, true)
    }
}

/// Non-interactive elevation attempted on the chance that an earlier grant
/// in this session is still valid, even when the implicit probe was ambiguous
pub struct CachedSessionStrategy {
    ctx: ProbeContext,
}

impl CachedSessionStrategy {
    pub fn new(runner: Arc<dyn ProcessRunner>, target: ServiceTarget, probe_timeout: Duration) -> Self {
        Self {
            ctx: ProbeContext {
                runner,
                target,
                timeout: probe_timeout,
            },
        }
    }
}

#[async_trait]
impl Strategy for CachedSessionStrategy {
    fn name(&self) -> &str {
        CACHED_SESSION
    }

    async fn probe(&self) -> bool {
        self.ctx.tool_installed().await
    }

    fn transform(&self, command: &Command) -> Command {
        elevate(command, &self.ctx.target, true)
    }
}

/// Elevation that may prompt for a password on the terminal
pub struct InteractiveStrategy {
    ctx: ProbeContext,
}

impl InteractiveStrategy {
    pub fn new(runner: Arc<dyn ProcessRunner>, target: ServiceTarget, probe_timeout: Duration) -> Self {
        Self {
            ctx: ProbeContext {
                runner,
                target,
                timeout: probe_timeout,
            },
        }
    }
}

/// Whether a human could answer a prompt right now
pub fn terminal_attached() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

#[async_trait]
impl Strategy for InteractiveStrategy {
    fn name(&self) -> &str {
        INTERACTIVE
    }

    async fn probe(&self) -> bool {
        if !terminal_attached() {
            debug!("No terminal attached, interactive elevation unavailable");
            return false;
        }
        self.ctx.tool_installed().await
    }

    fn transform(&self, command: &Command) -> Command {
        elevate(command, &self.ctx.target, false)
    }

    fn requires_interactive(&self) -> bool {
        true
    }
}
