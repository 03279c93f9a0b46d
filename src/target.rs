//! Target Service Description
//!
//! What the engine needs to know about the database server it administers:
//! the OS account that owns it, the client tools that talk to it, where its
//! access-control file lives, and how the host elevates privileges.

use crate::config::ServiceConfig;
use std::path::PathBuf;

/// A locally-running database service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    /// OS account that owns the server process (e.g. "postgres")
    pub account: String,

    /// Command-line client used for probes (e.g. "psql")
    pub client: String,

    /// Programs that must run as the service account when elevated
    pub client_tools: Vec<String>,

    /// Service manager unit name (e.g. "postgresql")
    pub service_name: String,

    /// Explicit access-control file path; located automatically when unset
    pub hba_path: Option<PathBuf>,

    /// Host privilege-elevation tool (e.g. "sudo")
    pub elevation_tool: String,
}

impl Default for ServiceTarget {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

impl ServiceTarget {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            account: config.account.clone(),
            client: config.client.clone(),
            client_tools: config.client_tools.clone(),
            service_name: config.service_name.clone(),
            hba_path: config.hba_path.as_ref().map(PathBuf::from),
            elevation_tool: config.elevation_tool.clone(),
        }
    }

    /// Read-only no-op query through the client
    pub fn client_probe(&self) -> String {
        format!("{} -tAc 'SELECT 1'", self.client)
    }

    /// Whether `program` is one of the service's own tools
    pub fn is_client_tool(&self, program: &str) -> bool {
        let base = program.rsplit('/').next().unwrap_or(program);
        base == self.client || self.client_tools.iter().any(|t| t == base)
    }

    /// Service-manager restart request
    pub fn restart_command(&self) -> String {
        format!("systemctl restart {}", self.service_name)
    }
}
