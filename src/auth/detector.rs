//! Authentication Mode Detector
//!
//! Works out which elevation modes the target service accepts right now by
//! combining two read-only sources:
//!
//! - passive: the access-control file's rules for the service account
//! - active: one no-op query run as the service account via `sudo -n`
//!
//! The active probe decides `supports_implicit`, since the file can be stale
//! or overridden. Nothing is retained between calls.

use super::hba::{AuthMode, HbaFile};
use crate::command::Command;
use crate::elevation::{elevate, shell_quote};
use crate::runner::ProcessRunner;
use crate::target::ServiceTarget;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Which elevation modes the service accepted at detection time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthModeSnapshot {
    pub supports_implicit: bool,
    pub supports_trusted: bool,
    pub supports_password: bool,

    /// Access-control file that was parsed, if any
    pub config_path: Option<PathBuf>,

    /// False when the snapshot is based on the active probe alone
    pub config_readable: bool,
}

impl AuthModeSnapshot {
    pub fn supports(&self, mode: AuthMode) -> bool {
        match mode {
            AuthMode::Implicit => self.supports_implicit,
            AuthMode::Trusted => self.supports_trusted,
            AuthMode::Password => self.supports_password,
        }
    }

    /// Only credential-based access is available
    pub fn password_only(&self) -> bool {
        !self.supports_implicit && !self.supports_trusted
    }
}

/// Where to look for the access-control file when none is configured
#[derive(Debug, Clone)]
pub struct SearchPaths {
    /// Debian layout root: `<root>/<version>/main/pg_hba.conf`
    pub versioned_root: PathBuf,

    /// Fixed candidates checked after the versioned root
    pub fixed: Vec<PathBuf>,
}

impl Default for SearchPaths {
    fn default() -> Self {
        Self {
            versioned_root: PathBuf::from("/etc/postgresql"),
            fixed: vec![
                PathBuf::from("/var/lib/pgsql/data/pg_hba.conf"),
                PathBuf::from("/var/lib/postgresql/data/pg_hba.conf"),
            ],
        }
    }
}

impl SearchPaths {
    /// Candidate files in preference order, newest server version first
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut versions: Vec<(Vec<u32>, PathBuf)> = std::fs::read_dir(&self.versioned_root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| {
                        let name = entry.file_name().to_string_lossy().to_string();
                        let version: Vec<u32> = name
                            .split('.')
                            .map(|part| part.parse::<u32>())
                            .collect::<Result<_, _>>()
                            .ok()?;
                        Some((version, entry.path().join("main").join("pg_hba.conf")))
                    })
                    .collect()
            })
            .unwrap_or_default();
        versions.sort_by(|a, b| b.0.cmp(&a.0));

        versions
            .into_iter()
            .map(|(_, path)| path)
            .chain(self.fixed.iter().cloned())
            .collect()
    }
}

/// Stateless detector; every `detect` call reads and probes afresh
#[derive(Clone)]
pub struct AuthModeDetector {
    runner: Arc<dyn ProcessRunner>,
    probe_timeout: Duration,
    search: SearchPaths,
}

impl std::fmt::Debug for AuthModeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthModeDetector")
            .field("probe_timeout", &self.probe_timeout)
            .field("search", &self.search)
            .finish()
    }
}

impl AuthModeDetector {
    pub fn new(runner: Arc<dyn ProcessRunner>, probe_timeout: Duration) -> Self {
        Self {
            runner,
            probe_timeout,
            search: SearchPaths::default(),
        }
    }

    pub fn with_search_paths(mut self, search: SearchPaths) -> Self {
        self.search = search;
        self
    }

    /// Find the access-control file for `target`
    pub fn locate_config(&self, target: &ServiceTarget) -> Option<PathBuf> {
        if let Some(ref path) = target.hba_path {
            return path.exists().then(|| path.clone());
        }
        self.search.candidates().into_iter().find(|p| p.exists())
    }

    /// Detect which elevation modes `target` accepts
    pub async fn detect(&self, target: &ServiceTarget) -> AuthModeSnapshot {
        let config_path = self.locate_config(target);
        let parsed = match config_path.as_deref() {
            Some(path) => self.read_hba(path, target).await,
            None => None,
        };

        let supports_implicit = self.probe_implicit(target).await;

        let snapshot = match parsed {
            Some(file) => {
                if file.grants(&target.account, AuthMode::Implicit) != supports_implicit {
                    debug!(
                        "Access-control file and active probe disagree on implicit access; probe wins ({})",
                        supports_implicit
                    );
                }
                AuthModeSnapshot {
                    supports_implicit,
                    supports_trusted: file.grants(&target.account, AuthMode::Trusted),
                    supports_password: file.grants(&target.account, AuthMode::Password),
                    config_path,
                    config_readable: true,
                }
            }
            None => {
                debug!("Access-control file unavailable, using active probe only");
                AuthModeSnapshot {
                    supports_implicit,
                    config_path,
                    config_readable: false,
                    ..Default::default()
                }
            }
        };

        info!(
            "Auth modes for '{}': implicit={}, trusted={}, password={}",
            target.account,
            snapshot.supports_implicit,
            snapshot.supports_trusted,
            snapshot.supports_password
        );
        snapshot
    }

    /// Run the client no-op as the service account without prompting
    pub async fn probe_implicit(&self, target: &ServiceTarget) -> bool {
        let probe = elevate(&Command::new(target.client_probe()), target, true);
        self.run_probe(probe.text()).await
    }

    /// Run the client no-op as the service account's database role, without
    /// switching OS user; succeeds only if the service trusts the connection
    pub async fn probe_trusted(&self, target: &ServiceTarget) -> bool {
        let probe = format!("{} -U {}", target.client_probe(), target.account);
        self.run_probe(&probe).await
    }

    /// Read and parse the access-control file, through `sudo -n cat` when
    /// the file is owned by the service account
    async fn read_hba(&self, path: &Path, target: &ServiceTarget) -> Option<HbaFile> {
        match std::fs::read_to_string(path) {
            Ok(content) => return Some(HbaFile::parse(&content)),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                debug!("{:?} is not readable as the current user, trying elevated read", path);
            }
            Err(e) => {
                debug!("Cannot read {:?}: {}", path, e);
                return None;
            }
        }

        let read = format!(
            "{} -n cat {}",
            target.elevation_tool,
            shell_quote(&path.to_string_lossy())
        );
        match self.runner.run(&read, self.probe_timeout).await {
            Ok(result) => Some(HbaFile::parse(&result.stdout)),
            Err(e) => {
                debug!("Elevated read of {:?} failed: {}", path, e);
                None
            }
        }
    }

    async fn run_probe(&self, probe: &str) -> bool {
        match self.runner.run(probe, self.probe_timeout).await {
            Ok(result) => result.stdout.trim() == "1",
            Err(e) => {
                debug!("Probe `{}` failed: {}", probe, e);
                false
            }
        }
    }
}
