//! Service Authentication Modes
//!
//! Detection of the elevation modes the database service accepts, and the
//! confirmed reconfiguration that enables a missing one.

mod detector;
mod hba;
mod reconfigure;

pub use detector::{AuthModeDetector, AuthModeSnapshot, SearchPaths};
pub use hba::{AuthMethod, AuthMode, HbaFile, HbaRule, RuleChange};
pub use reconfigure::{backup_path, AuthReconfigurer, EditPlan, ReconfigureOutcome};
