//! End-to-end strategy selection against a simulated host
//!
//! The built-in strategies run unmodified; only the process runner is
//! replaced, answering the way a host with the given sudo setup would.

use async_trait::async_trait;
use pg_elevate::command::{Command, CommandClass};
use pg_elevate::elevation::{
    AdaptiveExecutor, CachedSessionStrategy, DirectStrategy, ImplicitStrategy,
    InteractiveStrategy, StrategyCatalog, IMPLICIT,
};
use pg_elevate::runner::{ExecutionPolicy, ExecutionResult, ProcessRunner};
use pg_elevate::target::ServiceTarget;
use pg_elevate::{ElevateError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DIRECT_PROBE: &str = "psql -tAc 'SELECT 1'";
const IMPLICIT_PROBE: &str = "sudo -n true";

/// A host where the current user has no database access and sudo may or may
/// not be passwordless
struct SimulatedHost {
    passwordless_sudo: AtomicBool,
    sudo_installed: bool,
    calls: Mutex<Vec<String>>,
}

impl SimulatedHost {
    fn new(passwordless_sudo: bool, sudo_installed: bool) -> Arc<Self> {
        Arc::new(Self {
            passwordless_sudo: AtomicBool::new(passwordless_sudo),
            sudo_installed,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == command).count()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn refused(command: &str, message: &str) -> Result<ExecutionResult> {
    Err(ElevateError::ProcessError {
        command: command.to_string(),
        exit_code: Some(1),
        message: message.to_string(),
    })
}

#[async_trait]
impl ProcessRunner for SimulatedHost {
    async fn run(&self, command: &str, _timeout: Duration) -> Result<ExecutionResult> {
        self.calls.lock().unwrap().push(command.to_string());

        if command == "command -v sudo" {
            return if self.sudo_installed {
                Ok(ExecutionResult::from_stdout("/usr/bin/sudo\n"))
            } else {
                refused(command, "")
            };
        }

        if command.starts_with("sudo -n ") {
            return if self.passwordless_sudo.load(Ordering::SeqCst) {
                Ok(ExecutionResult::from_stdout(format!("elevated: {}", command)))
            } else {
                refused(command, "sudo: a password is required")
            };
        }

        if command.starts_with("sudo ") {
            // would need a password typed at a terminal
            return Err(ElevateError::TimeoutExceeded {
                command: command.to_string(),
                timeout: Duration::from_secs(1),
            });
        }

        refused(
            command,
            "psql: error: FATAL:  role \"alice\" does not exist",
        )
    }
}

fn target() -> ServiceTarget {
    ServiceTarget::default()
}

fn policy() -> ExecutionPolicy {
    ExecutionPolicy::new("list databases", Duration::from_secs(5), 2).unwrap()
}

/// direct + implicit only
fn two_tier(host: &Arc<SimulatedHost>) -> AdaptiveExecutor {
    let runner: Arc<dyn ProcessRunner> = host.clone();
    let probe = Duration::from_secs(1);
    let catalog = StrategyCatalog::new()
        .with(Arc::new(DirectStrategy::new(runner.clone(), target(), probe)))
        .unwrap()
        .with(Arc::new(ImplicitStrategy::new(runner.clone(), target(), probe)))
        .unwrap();
    AdaptiveExecutor::new(catalog, runner).with_retry_backoff(Duration::from_millis(1))
}

fn command() -> Command {
    Command::with_class("psql -l", CommandClass::new("X"))
}

#[tokio::test]
async fn test_falls_through_to_implicit_and_caches_it() {
    let host = SimulatedHost::new(true, true);
    let mut executor = two_tier(&host);

    let result = executor.execute(&command(), &policy()).await.unwrap();

    assert_eq!(result.stdout, "elevated: sudo -n -u postgres psql -l");
    let entry = executor.cache().get(&CommandClass::new("X")).unwrap();
    assert_eq!(entry.strategy_name, IMPLICIT);
    assert_eq!(host.count(DIRECT_PROBE), 1);
    assert_eq!(host.count(IMPLICIT_PROBE), 1);
}

#[tokio::test]
async fn test_cached_class_skips_probing() {
    let host = SimulatedHost::new(true, true);
    let mut executor = two_tier(&host);
    executor.execute(&command(), &policy()).await.unwrap();
    host.clear_calls();

    let result = executor.execute(&command(), &policy()).await.unwrap();

    assert_eq!(result.stdout, "elevated: sudo -n -u postgres psql -l");
    assert_eq!(host.calls(), vec!["sudo -n -u postgres psql -l"]);
}

#[tokio::test]
async fn test_cached_strategy_failure_reprobes_and_reports_all_errors() {
    let host = SimulatedHost::new(true, true);
    let mut executor = two_tier(&host);
    executor.execute(&command(), &policy()).await.unwrap();
    host.clear_calls();

    // sudoers entry removed behind our back
    host.passwordless_sudo.store(false, Ordering::SeqCst);
    let err = executor.execute(&command(), &policy()).await.unwrap_err();

    assert!(!executor.cache().contains(&CommandClass::new("X")));
    assert_eq!(host.count(DIRECT_PROBE), 1);
    assert_eq!(host.count(IMPLICIT_PROBE), 1);

    match err {
        ElevateError::NoCapableStrategy {
            ref operation,
            ref outcomes,
            ..
        } => {
            assert_eq!(operation, "list databases");
            let names: Vec<&str> = outcomes.iter().map(|o| o.strategy.as_str()).collect();
            assert_eq!(names, vec!["implicit (cached)", "direct", "implicit"]);
        }
        other => panic!("expected NoCapableStrategy, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("a password is required"));
    assert!(message.contains("probe reported incapable"));
}

#[tokio::test]
async fn test_interactive_tier_never_probed_when_prompts_disallowed() {
    let host = SimulatedHost::new(false, true);
    let runner: Arc<dyn ProcessRunner> = host.clone();
    let probe = Duration::from_secs(1);
    let interactive = Arc::new(InteractiveStrategy::new(runner.clone(), target(), probe));
    let catalog = StrategyCatalog::new()
        .with(Arc::new(DirectStrategy::new(runner.clone(), target(), probe)))
        .unwrap()
        .with(Arc::new(ImplicitStrategy::new(runner.clone(), target(), probe)))
        .unwrap()
        .with(interactive)
        .unwrap();
    let mut executor =
        AdaptiveExecutor::new(catalog, runner).with_retry_backoff(Duration::from_millis(1));

    let err = executor.execute(&command(), &policy()).await.unwrap_err();

    assert!(matches!(err, ElevateError::NoCapableStrategy { .. }));
    assert!(err.to_string().contains("interactive prompts not allowed"));
    // the interactive probe would have asked whether sudo is installed
    assert_eq!(host.count("command -v sudo"), 0);
    assert!(host.calls().iter().all(|c| !c.starts_with("sudo -u")));
}

#[tokio::test]
async fn test_permission_refusal_is_not_retried() {
    let host = SimulatedHost::new(false, true);
    let runner: Arc<dyn ProcessRunner> = host.clone();
    let catalog = StrategyCatalog::new()
        .with(Arc::new(CachedSessionStrategy::new(
            runner.clone(),
            target(),
            Duration::from_secs(1),
        )))
        .unwrap();
    let mut executor =
        AdaptiveExecutor::new(catalog, runner).with_retry_backoff(Duration::from_millis(1));
    let policy = ExecutionPolicy::new("drop database", Duration::from_secs(5), 5).unwrap();

    let err = executor
        .execute(&Command::new("dropdb legacy"), &policy)
        .await
        .unwrap_err();

    assert!(matches!(err, ElevateError::NoCapableStrategy { .. }));
    assert_eq!(host.count("sudo -n -u postgres dropdb legacy"), 1);
    assert_eq!(
        err.remediation(),
        Some("sudo -n -u postgres dropdb legacy")
    );
}

#[tokio::test]
async fn test_standard_catalog_non_client_command_uses_root_shell() {
    let host = SimulatedHost::new(true, true);
    let runner: Arc<dyn ProcessRunner> = host.clone();
    let catalog = StrategyCatalog::standard(runner.clone(), &target(), Duration::from_secs(1));
    assert_eq!(
        catalog.names(),
        vec!["direct", "implicit", "cached-session", "interactive"]
    );
    let mut executor =
        AdaptiveExecutor::new(catalog, runner).with_retry_backoff(Duration::from_millis(1));

    let result = executor
        .execute(
            &Command::new("systemctl restart postgresql"),
            &ExecutionPolicy::labeled("restart"),
        )
        .await
        .unwrap();

    assert_eq!(
        result.stdout,
        "elevated: sudo -n sh -c 'systemctl restart postgresql'"
    );
}
