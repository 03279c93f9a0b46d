//! Elevation-Mode Reconfiguration
//!
//! Switches the service to accept an elevation mode by editing the one rule
//! for the service account in its access-control file.
//!
//! Flow: plan -> (caller confirms) -> apply. `apply` backs the file up under a
//! timestamped name, writes the edit, restarts the service and re-probes. A
//! failed probe after the edit is reported with the backup path; the edit is
//! not reverted, since a second restart could fail as well.

use super::detector::AuthModeDetector;
use super::hba::{AuthMode, HbaFile, RuleChange};
use crate::command::{Command, CommandClass};
use crate::elevation::{shell_quote, AdaptiveExecutor};
use crate::error::{EditStage, ElevateError, Result};
use crate::runner::ExecutionPolicy;
use crate::target::ServiceTarget;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A computed, not yet applied, access-control edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPlan {
    pub path: PathBuf,
    pub mode: AuthMode,
    pub original: String,
    pub updated: String,
    pub change: RuleChange,
}

impl fmt::Display for EditPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Enable {} access in {}",
            self.mode,
            self.path.display()
        )?;
        write!(f, "{}", self.change)
    }
}

/// Result of a successful `apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigureOutcome {
    /// The service already accepted the mode; nothing was touched
    AlreadyEnabled,
    /// The edit was written, the service restarted and the probe passed
    Applied { backup: PathBuf },
}

pub struct AuthReconfigurer {
    detector: AuthModeDetector,
    policy: ExecutionPolicy,
}

impl AuthReconfigurer {
    /// `policy` bounds the privileged steps (file copies and the restart)
    pub fn new(detector: AuthModeDetector, policy: ExecutionPolicy) -> Self {
        Self { detector, policy }
    }

    /// Compute the edit that makes `target` accept `mode`
    pub async fn plan(
        &self,
        executor: &mut AdaptiveExecutor,
        target: &ServiceTarget,
        mode: AuthMode,
    ) -> Result<EditPlan> {
        let path = self
            .detector
            .locate_config(target)
            .ok_or_else(|| edit_failed(EditStage::Locate, "access-control file not found", None))?;

        let original = self.read(executor, &path).await?;
        let (updated, change) = HbaFile::parse(&original).with_local_mode(&target.account, mode);

        Ok(EditPlan {
            path,
            mode,
            original,
            updated,
            change,
        })
    }

    /// Apply a plan the user has confirmed
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationEditFailed` naming the stage that failed: no
    /// confirmation, file changed since planning, backup, write, restart, or
    /// the post-restart probe.
    pub async fn apply(
        &self,
        executor: &mut AdaptiveExecutor,
        target: &ServiceTarget,
        plan: &EditPlan,
        confirmed: bool,
    ) -> Result<ReconfigureOutcome> {
        if !confirmed {
            return Err(edit_failed(
                EditStage::Confirmation,
                "reconfiguration was not confirmed",
                None,
            ));
        }

        let snapshot = self.detector.detect(target).await;
        if snapshot.supports(plan.mode) {
            info!("Service already accepts {} access, nothing to change", plan.mode);
            return Ok(ReconfigureOutcome::AlreadyEnabled);
        }

        let current = self.read(executor, &plan.path).await?;
        if current != plan.original {
            return Err(edit_failed(
                EditStage::Read,
                "file changed since the edit was planned",
                None,
            ));
        }

        let backup = backup_path(&plan.path);
        self.backup(executor, &plan.path, &backup).await?;
        info!("Backed up {} to {}", plan.path.display(), backup.display());

        self.write(executor, &plan.path, &plan.updated)
            .await
            .map_err(|e| with_backup(e, &backup))?;
        info!("Applied access-control edit:\n{}", plan.change);

        let restart = Command::with_class(target.restart_command(), CommandClass::new("service-restart"));
        executor
            .execute(&restart, &self.step_policy("restart database service"))
            .await
            .map_err(|e| edit_failed(EditStage::Restart, e.to_string(), Some(backup.clone())))?;

        let verified = match plan.mode {
            AuthMode::Implicit => self.detector.probe_implicit(target).await,
            AuthMode::Trusted => self.detector.probe_trusted(target).await,
            AuthMode::Password => {
                let reread = self.read(executor, &plan.path).await?;
                HbaFile::parse(&reread).grants(&target.account, AuthMode::Password)
            }
        };

        if !verified {
            warn!(
                "{} access still unavailable after restart; original file kept at {}",
                plan.mode,
                backup.display()
            );
            return Err(edit_failed(
                EditStage::Verify,
                format!("{} access probe failed after restart", plan.mode),
                Some(backup),
            ));
        }

        info!("Service now accepts {} access", plan.mode);
        Ok(ReconfigureOutcome::Applied { backup })
    }

    fn step_policy(&self, label: &str) -> ExecutionPolicy {
        self.policy.clone().with_operation_label(label)
    }

    async fn read(&self, executor: &mut AdaptiveExecutor, path: &Path) -> Result<String> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                let cmd = Command::with_class(
                    format!("cat {}", shell_quote(&path.to_string_lossy())),
                    CommandClass::new("config-read"),
                );
                executor
                    .execute(&cmd, &self.step_policy("read access-control file"))
                    .await
                    .map(|result| result.stdout)
                    .map_err(|e| edit_failed(EditStage::Read, e.to_string(), None))
            }
            Err(e) => Err(edit_failed(EditStage::Read, e.to_string(), None)),
        }
    }

    async fn backup(&self, executor: &mut AdaptiveExecutor, path: &Path, backup: &Path) -> Result<()> {
        match std::fs::copy(path, backup) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                self.privileged_copy(executor, path, backup, "back up access-control file")
                    .await
                    .map_err(|e| edit_failed(EditStage::Backup, e.to_string(), None))
            }
            Err(e) => Err(edit_failed(EditStage::Backup, e.to_string(), None)),
        }
    }

    async fn write(&self, executor: &mut AdaptiveExecutor, path: &Path, content: &str) -> Result<()> {
        match std::fs::write(path, content) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                let staged = std::env::temp_dir().join(format!(
                    "pg-elevate-{}-{}.conf",
                    std::process::id(),
                    chrono::Local::now().format("%Y%m%d%H%M%S%f")
                ));
                std::fs::write(&staged, content)
                    .map_err(|e| edit_failed(EditStage::Write, e.to_string(), None))?;
                let copied = self
                    .privileged_copy(executor, &staged, path, "write access-control file")
                    .await;
                let _ = std::fs::remove_file(&staged);
                copied.map_err(|e| edit_failed(EditStage::Write, e.to_string(), None))
            }
            Err(e) => Err(edit_failed(EditStage::Write, e.to_string(), None)),
        }
    }

    /// `cp` through the executor; overwriting keeps the destination's owner
    /// and mode
    async fn privileged_copy(
        &self,
        executor: &mut AdaptiveExecutor,
        from: &Path,
        to: &Path,
        label: &str,
    ) -> Result<()> {
        let cmd = Command::with_class(
            format!(
                "cp {} {}",
                shell_quote(&from.to_string_lossy()),
                shell_quote(&to.to_string_lossy())
            ),
            CommandClass::new("config-copy"),
        );
        executor.execute(&cmd, &self.step_policy(label)).await.map(|_| ())
    }
}

/// `<file>.bak.<YYYYmmddHHMMSS>` next to the original
pub fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "pg_hba.conf".to_string());
    path.with_file_name(format!(
        "{}.bak.{}",
        name,
        chrono::Local::now().format("%Y%m%d%H%M%S")
    ))
}

fn edit_failed(stage: EditStage, message: impl Into<String>, backup: Option<PathBuf>) -> ElevateError {
    ElevateError::ConfigurationEditFailed {
        stage,
        message: message.into(),
        backup,
    }
}

fn with_backup(err: ElevateError, backup: &Path) -> ElevateError {
    match err {
        ElevateError::ConfigurationEditFailed { stage, message, .. } => {
            edit_failed(stage, message, Some(backup.to_path_buf()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::{Strategy, StrategyCatalog};
    use crate::runner::{ExecutionResult, ProcessRunner};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Service double: the implicit probe passes once a restart has happened
    /// and `fixes_on_restart` is set
    struct FakeService {
        restarted: AtomicBool,
        restarts: AtomicUsize,
        fixes_on_restart: bool,
        restart_fails: bool,
        implicit_initially: bool,
    }

    impl FakeService {
        fn new(fixes_on_restart: bool) -> Arc<Self> {
            Arc::new(Self {
                restarted: AtomicBool::new(false),
                restarts: AtomicUsize::new(0),
                fixes_on_restart,
                restart_fails: false,
                implicit_initially: false,
            })
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeService {
        async fn run(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
            if command.contains("systemctl restart") {
                self.restarts.fetch_add(1, Ordering::SeqCst);
                if self.restart_fails {
                    return Err(ElevateError::ProcessError {
                        command: command.to_string(),
                        exit_code: Some(5),
                        message: "Unit postgresql.service not found.".to_string(),
                    });
                }
                self.restarted.store(true, Ordering::SeqCst);
                return Ok(ExecutionResult::default());
            }
            if command.contains("SELECT 1") {
                let ok = self.implicit_initially
                    || (self.fixes_on_restart && self.restarted.load(Ordering::SeqCst));
                return if ok {
                    Ok(ExecutionResult::from_stdout("1\n"))
                } else {
                    Err(ElevateError::TimeoutExceeded {
                        command: command.to_string(),
                        timeout,
                    })
                };
            }
            Ok(ExecutionResult::default())
        }
    }

    struct PassThrough;

    #[async_trait]
    impl Strategy for PassThrough {
        fn name(&self) -> &str {
            "direct"
        }

        async fn probe(&self) -> bool {
            true
        }

        fn transform(&self, command: &Command) -> Command {
            command.clone()
        }
    }

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        target: ServiceTarget,
        service: Arc<FakeService>,
        executor: AdaptiveExecutor,
        reconfigurer: AuthReconfigurer,
    }

    const HBA: &str = "# comment\nlocal   all   postgres   md5\nlocal   all   all   peer\n";

    fn fixture(service: Arc<FakeService>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pg_hba.conf");
        std::fs::write(&path, HBA).unwrap();

        let target = ServiceTarget {
            hba_path: Some(path.clone()),
            ..Default::default()
        };
        let catalog = StrategyCatalog::new().with(Arc::new(PassThrough)).unwrap();
        let executor = AdaptiveExecutor::new(catalog, service.clone())
            .with_retry_backoff(Duration::from_millis(1));
        let detector = AuthModeDetector::new(service.clone(), Duration::from_secs(1));
        let policy = ExecutionPolicy::new("reconfigure", Duration::from_secs(5), 1).unwrap();

        Fixture {
            _dir: dir,
            path,
            target,
            service,
            executor,
            reconfigurer: AuthReconfigurer::new(detector, policy),
        }
    }

    #[tokio::test]
    async fn test_plan_describes_scoped_edit() {
        let mut fx = fixture(FakeService::new(true));
        let plan = fx
            .reconfigurer
            .plan(&mut fx.executor, &fx.target, AuthMode::Implicit)
            .await
            .unwrap();

        assert_eq!(plan.path, fx.path);
        assert_eq!(plan.original, HBA);
        assert!(matches!(plan.change, RuleChange::Replace { line: 1, .. }));
        assert!(plan.updated.contains("local   all   postgres   peer"));
        assert!(plan.to_string().contains("Enable implicit access"));
        // planning touches nothing
        assert_eq!(std::fs::read_to_string(&fx.path).unwrap(), HBA);
    }

    #[tokio::test]
    async fn test_apply_requires_confirmation() {
        let mut fx = fixture(FakeService::new(true));
        let plan = fx
            .reconfigurer
            .plan(&mut fx.executor, &fx.target, AuthMode::Implicit)
            .await
            .unwrap();

        let err = fx
            .reconfigurer
            .apply(&mut fx.executor, &fx.target, &plan, false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ElevateError::ConfigurationEditFailed {
                stage: EditStage::Confirmation,
                ..
            }
        ));
        assert_eq!(std::fs::read_to_string(&fx.path).unwrap(), HBA);
        assert_eq!(fx.service.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_apply_backs_up_edits_restarts_and_verifies() {
        let mut fx = fixture(FakeService::new(true));
        let plan = fx
            .reconfigurer
            .plan(&mut fx.executor, &fx.target, AuthMode::Implicit)
            .await
            .unwrap();

        let outcome = fx
            .reconfigurer
            .apply(&mut fx.executor, &fx.target, &plan, true)
            .await
            .unwrap();

        let backup = match outcome {
            ReconfigureOutcome::Applied { backup } => backup,
            other => panic!("expected Applied, got {:?}", other),
        };
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("pg_hba.conf.bak."));
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), HBA);
        assert_eq!(std::fs::read_to_string(&fx.path).unwrap(), plan.updated);
        assert_eq!(fx.service.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_verification_reports_backup_without_revert() {
        let mut fx = fixture(FakeService::new(false));
        let plan = fx
            .reconfigurer
            .plan(&mut fx.executor, &fx.target, AuthMode::Implicit)
            .await
            .unwrap();

        let err = fx
            .reconfigurer
            .apply(&mut fx.executor, &fx.target, &plan, true)
            .await
            .unwrap_err();

        match err {
            ElevateError::ConfigurationEditFailed {
                stage: EditStage::Verify,
                backup: Some(backup),
                ..
            } => assert_eq!(std::fs::read_to_string(backup).unwrap(), HBA),
            other => panic!("expected verify failure, got {:?}", other),
        }
        // the edit stays in place
        assert_eq!(std::fs::read_to_string(&fx.path).unwrap(), plan.updated);
    }

    #[tokio::test]
    async fn test_already_enabled_is_noop() {
        let service = Arc::new(FakeService {
            restarted: AtomicBool::new(false),
            restarts: AtomicUsize::new(0),
            fixes_on_restart: false,
            restart_fails: false,
            implicit_initially: true,
        });
        let mut fx = fixture(service);
        let plan = fx
            .reconfigurer
            .plan(&mut fx.executor, &fx.target, AuthMode::Implicit)
            .await
            .unwrap();

        let outcome = fx
            .reconfigurer
            .apply(&mut fx.executor, &fx.target, &plan, true)
            .await
            .unwrap();
        assert_eq!(outcome, ReconfigureOutcome::AlreadyEnabled);
        assert_eq!(std::fs::read_to_string(&fx.path).unwrap(), HBA);
        assert_eq!(fx.service.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_failure_surfaces() {
        let service = Arc::new(FakeService {
            restarted: AtomicBool::new(false),
            restarts: AtomicUsize::new(0),
            fixes_on_restart: true,
            restart_fails: true,
            implicit_initially: false,
        });
        let mut fx = fixture(service);
        let plan = fx
            .reconfigurer
            .plan(&mut fx.executor, &fx.target, AuthMode::Implicit)
            .await
            .unwrap();

        let err = fx
            .reconfigurer
            .apply(&mut fx.executor, &fx.target, &plan, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ElevateError::ConfigurationEditFailed {
                stage: EditStage::Restart,
                backup: Some(_),
                ..
            }
        ));
        assert!(err.to_string().contains("restart database service"));
    }

    #[tokio::test]
    async fn test_plan_without_file_fails_at_locate() {
        let mut fx = fixture(FakeService::new(true));
        fx.target.hba_path = Some(fx.path.with_file_name("missing.conf"));
        let err = fx
            .reconfigurer
            .plan(&mut fx.executor, &fx.target, AuthMode::Trusted)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ElevateError::ConfigurationEditFailed {
                stage: EditStage::Locate,
                ..
            }
        ));
    }

    #[test]
    fn test_backup_path_format() {
        let backup = backup_path(Path::new("/etc/postgresql/16/main/pg_hba.conf"));
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("pg_hba.conf.bak."));
        assert_eq!(name.len(), "pg_hba.conf.bak.".len() + 14);
        assert_eq!(backup.parent(), Some(Path::new("/etc/postgresql/16/main")));
    }
}
