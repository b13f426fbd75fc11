//! Pipeline catalog.
//!
//! Lists the definition files in a pipelines folder so a user can pick one.

use crate::error::Result;
use crate::pipeline::{PipelineInfo, PipelineLoader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pipelines available in one folder, sorted by file name.
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
    folder: PathBuf,
    entries: Vec<PipelineInfo>,
}

impl PipelineCatalog {
    /// Scans `folder` for definition files the loader understands.
    ///
    /// Files that fail to load are skipped with a warning. A missing folder
    /// yields an empty catalog.
    pub fn discover(folder: &Path, loader: &dyn PipelineLoader) -> Result<Self> {
        let mut catalog = Self { folder: folder.to_path_buf(), entries: Vec::new() };

        let dir = match std::fs::read_dir(folder) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(folder = %folder.display(), "Pipeline folder does not exist");
                return Ok(catalog);
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for entry in dir {
            let path = entry?.path();
            let known = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| loader.extensions().contains(&ext));
            if path.is_file() && known {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        for path in paths {
            match loader.load(&path) {
                Ok(definition) => catalog.entries.push(definition.info()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unable to read pipeline file, ignoring");
                }
            }
        }

        debug!(folder = %folder.display(), pipelines = catalog.entries.len(), "Pipeline catalog refreshed");
        Ok(catalog)
    }

    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    #[must_use]
    pub fn entries(&self) -> &[PipelineInfo] {
        &self.entries
    }

    /// Finds a pipeline by display name or file stem.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&PipelineInfo> {
        self.entries.iter().find(|info| {
            info.name == name || info.path.file_stem().and_then(|s| s.to_str()) == Some(name)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
