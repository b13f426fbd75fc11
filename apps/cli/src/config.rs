//! CLI configuration file support.
//!
//! Configuration precedence:
//! 1. CLI arguments (handled by clap)
//! 2. Local config file (./.slideflowrc)
//! 3. Global config file (~/.slideflow/config.toml)
//! 4. Defaults

use serde::{Deserialize, Serialize};
use slideflow_orchestrator::OrchestratorConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CLI configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Project root holding `images/`, `pipelines/` and `results/`
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Log level
    #[serde(default)]
    pub log_level: Option<String>,

    /// Orchestrator tuning
    #[serde(default)]
    pub orchestrator: Option<OrchestratorConfig>,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum CliConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),
}

pub type CliConfigResult<T> = std::result::Result<T, CliConfigError>;

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> CliConfigResult<Self> {
        if !path.exists() {
            return Err(CliConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CliConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| CliConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// `~/.slideflow/config.toml`, if a home directory is known.
    pub fn default_global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".slideflow").join("config.toml"))
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".slideflowrc")
    }

    /// Loads the global config, then the local one on top of it.
    ///
    /// Missing files are skipped silently. Unreadable or unparsable files are
    /// skipped too and returned, so they can be reported once logging is up.
    pub fn discover_and_load() -> (Self, Vec<CliConfigError>) {
        Self::load_layered(Self::default_global_path().as_deref(), &Self::default_local_path())
    }

    fn load_layered(global: Option<&Path>, local: &Path) -> (Self, Vec<CliConfigError>) {
        let mut config = Self::default();
        let mut skipped = Vec::new();

        for path in global.into_iter().chain(std::iter::once(local)) {
            match Self::load_from_file(path) {
                Ok(other) => config.merge(other),
                Err(CliConfigError::NotFound(_)) => {}
                Err(e) => skipped.push(e),
            }
        }
        (config, skipped)
    }

    /// Values set in `other` override values in `self`.
    pub fn merge(&mut self, other: Self) {
        if other.root_folder.is_some() {
            self.root_folder = other.root_folder;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.orchestrator.is_some() {
            self.orchestrator = other.orchestrator;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "root_folder = \"/data/project\"\nlog_level = \"debug\"\n\n[orchestrator]\nprogress_interval_ms = 50\n",
        )
        .unwrap();

        let config = CliConfig::load_from_file(&path).unwrap();
        assert_eq!(config.root_folder, Some(PathBuf::from("/data/project")));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        let orchestrator = config.orchestrator.unwrap();
        assert_eq!(orchestrator.progress_interval_ms, 50);
        assert_eq!(orchestrator.image_binding, "WSI");
    }

    #[test]
    fn test_layered_load_skips_broken_file() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("config.toml");
        let local = temp.path().join(".slideflowrc");
        std::fs::write(&global, "root_folder = \"/data/global\"\nlog_level = \"warn\"\n").unwrap();
        std::fs::write(&local, "root_folder = [unclosed\n").unwrap();

        let (config, skipped) = CliConfig::load_layered(Some(&global), &local);
        assert_eq!(config.root_folder, Some(PathBuf::from("/data/global")));
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert_eq!(skipped.len(), 1);
        assert!(matches!(skipped[0], CliConfigError::ParseError(_)));

        let (_, skipped) = CliConfig::load_layered(None, &temp.path().join("absent"));
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            CliConfig::load_from_file(&temp.path().join("nope.toml")),
            Err(CliConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_merge_overrides_set_values_only() {
        let mut base = CliConfig {
            root_folder: Some(PathBuf::from("/global")),
            log_level: Some("warn".to_string()),
            orchestrator: None,
        };
        base.merge(CliConfig { log_level: Some("debug".to_string()), ..CliConfig::default() });

        assert_eq!(base.root_folder, Some(PathBuf::from("/global")));
        assert_eq!(base.log_level.as_deref(), Some("debug"));
    }
}
