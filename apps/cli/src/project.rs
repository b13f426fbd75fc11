//! Directory-backed project.
//!
//! Layout under the project root:
//! - `images/`: one file per image, identified by file name
//! - `pipelines/`: pipeline definition files
//! - `results/<image>/<pipeline-stem>.json`: saved outputs

use serde::Serialize;
use slideflow_orchestrator::{ImageHandle, ImageId, OutputData, PipelineInfo, PipelineOutput, ProjectProvider};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct DirectoryProject {
    root: PathBuf,
    images: Vec<ImageId>,
    current: Option<ImageId>,
}

#[derive(Serialize)]
struct SavedResults<'a> {
    image: &'a ImageId,
    pipeline: &'a str,
    pipeline_file: &'a Path,
    saved_at: chrono::DateTime<chrono::Utc>,
    outputs: &'a [OutputData],
}

impl DirectoryProject {
    /// Scans `<root>/images`. The first image is selected.
    pub fn open(root: &Path) -> std::io::Result<Self> {
        let images_dir = root.join("images");
        let mut images = Vec::new();
        match std::fs::read_dir(&images_dir) {
            Ok(dir) => {
                for entry in dir {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        images.push(ImageId::new(entry.file_name().to_string_lossy()));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        images.sort();

        Ok(Self { root: root.to_path_buf(), current: images.first().cloned(), images })
    }

    /// Selects `image` as the current image.
    ///
    /// # Returns
    /// `false` if the project has no such image.
    pub fn select(&mut self, image: &ImageId) -> bool {
        if self.images.contains(image) {
            self.current = Some(image.clone());
            true
        } else {
            false
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipelines_dir(&self) -> PathBuf {
        self.root.join("pipelines")
    }

    pub fn results_path(&self, image: &ImageId, pipeline: &PipelineInfo) -> PathBuf {
        let stem = pipeline.path.file_stem().map_or_else(
            || pipeline.name.clone(),
            |stem| stem.to_string_lossy().into_owned(),
        );
        self.root.join("results").join(image.as_str()).join(format!("{stem}.json"))
    }
}

impl ProjectProvider for DirectoryProject {
    fn image_ids(&self) -> Vec<ImageId> {
        self.images.clone()
    }

    fn image(&self, id: &ImageId) -> Option<ImageHandle> {
        self.images
            .contains(id)
            .then(|| ImageHandle::new(id.as_str(), self.root.join("images").join(id.as_str())))
    }

    fn current_image(&self) -> Option<ImageId> {
        self.current.clone()
    }

    fn save_results(
        &self,
        image: &ImageId,
        pipeline: &PipelineInfo,
        output: &PipelineOutput,
    ) -> Result<(), String> {
        let path = self.results_path(image, pipeline);
        let saved = SavedResults {
            image,
            pipeline: &pipeline.name,
            pipeline_file: &pipeline.path,
            saved_at: chrono::Utc::now(),
            outputs: output,
        };
        let json = serde_json::to_string_pretty(&saved).map_err(|e| e.to_string())?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("{}: {}", parent.display(), e))?;
        }
        std::fs::write(&path, json).map_err(|e| format!("{}: {}", path.display(), e))?;

        info!(image = %image, path = %path.display(), "Results saved");
        Ok(())
    }
}
