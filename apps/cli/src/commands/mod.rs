//! Command implementations for the slideflow CLI.

pub mod list;
pub mod run;

use slideflow_orchestrator::OrchestratorConfig;
use std::path::PathBuf;

/// Settings resolved from flags and configuration files.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root
    pub root: PathBuf,
    pub orchestrator: OrchestratorConfig,
}
