//! Orchestrator configuration.

use crate::error::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period of the progress sampling timer, in milliseconds.
    pub progress_interval_ms: u64,
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Name given to worker threads.
    pub worker_thread_name: String,
    /// Input name the target image is bound under.
    pub image_binding: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 200,
            event_capacity: 256,
            worker_thread_name: "pipeline-worker".to_string(),
            image_binding: "WSI".to_string(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| OrchestrationError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_ms == 0 {
            return Err(OrchestrationError::Config("progress_interval_ms must be > 0".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(OrchestrationError::Config("event_capacity must be > 0".to_string()));
        }
        if self.image_binding.trim().is_empty() {
            return Err(OrchestrationError::Config("image_binding is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.progress_interval(), Duration::from_millis(200));
        assert_eq!(config.image_binding, "WSI");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("orchestrator.toml");
        std::fs::write(&path, "progress_interval_ms = 50\n").unwrap();

        let config = OrchestratorConfig::load_from_file(&path).unwrap();
        assert_eq!(config.progress_interval_ms, 50);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("orchestrator.toml");
        std::fs::write(&path, "progress_interval_ms = 0\n").unwrap();

        assert!(matches!(
            OrchestratorConfig::load_from_file(&path),
            Err(OrchestrationError::Config(_))
        ));
    }
}
