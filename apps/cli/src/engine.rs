//! TOML pipeline definitions for headless runs.
//!
//! A definition file looks like:
//!
//! ```toml
//! name = "Tissue fingerprint"
//! description = "Tiles the slide and hashes every tile"
//! input = "WSI"
//!
//! [[stages]]
//! id = "patches"
//! type = "patch-generator"
//! tile_size = 65536
//! delay_ms = 0
//!
//! [[stages]]
//! id = "fingerprint"
//! type = "digest"
//!
//! [[outputs]]
//! name = "fingerprint"
//! stage = "fingerprint"
//! ```

use serde::Deserialize;
use sha2::{Digest, Sha256};
use slideflow_orchestrator::{
    AtomicProgress, Bindings, DefinitionError, ExecutionControl, ExecutionError, ImageHandle,
    OutputData, PipelineDefinition, PipelineInfo, PipelineLoader, PipelineOutput, ProcessObject,
    ProgressSource, Renderer,
};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TILE_SIZE: usize = 64 * 1024;

fn default_input() -> String {
    "WSI".to_string()
}

fn default_tile_size() -> usize {
    DEFAULT_TILE_SIZE
}

#[derive(Debug, Clone, Deserialize)]
struct PipelineFile {
    name: String,
    #[serde(default)]
    description: String,
    /// Binding name of the target image.
    #[serde(default = "default_input")]
    input: String,
    #[serde(default)]
    stages: Vec<StageSpec>,
    #[serde(default)]
    outputs: Vec<OutputSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum StageSpec {
    /// Splits the bound image file into fixed-size tiles.
    PatchGenerator {
        id: String,
        #[serde(default = "default_tile_size")]
        tile_size: usize,
        /// Pause after every tile, to make long runs observable.
        #[serde(default)]
        delay_ms: u64,
    },
    /// SHA-256 over the tiles of the closest upstream patch generator.
    ///
    /// Tiles are hashed as they are read, never collected.
    Digest { id: String },
}

impl StageSpec {
    fn id(&self) -> &str {
        match self {
            Self::PatchGenerator { id, .. } | Self::Digest { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OutputSpec {
    name: String,
    stage: String,
}

impl PipelineFile {
    fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::Malformed("pipeline name is empty".to_string()));
        }
        if self.stages.is_empty() {
            return Err(DefinitionError::Malformed("pipeline has no stages".to_string()));
        }

        let mut ids = HashSet::new();
        let mut has_patches = false;
        for stage in &self.stages {
            if !ids.insert(stage.id()) {
                return Err(DefinitionError::Malformed(format!("duplicate stage id '{}'", stage.id())));
            }
            match stage {
                StageSpec::PatchGenerator { tile_size: 0, id, .. } => {
                    return Err(DefinitionError::Malformed(format!("stage '{id}' has a zero tile_size")));
                }
                StageSpec::PatchGenerator { .. } => has_patches = true,
                StageSpec::Digest { id } if !has_patches => {
                    return Err(DefinitionError::Malformed(format!(
                        "digest stage '{id}' has no upstream patch-generator"
                    )));
                }
                StageSpec::Digest { .. } => {}
            }
        }

        let mut sinks = HashSet::new();
        for output in &self.outputs {
            if !ids.contains(output.stage.as_str()) {
                return Err(DefinitionError::Malformed(format!(
                    "output '{}' references unknown stage '{}'",
                    output.name, output.stage
                )));
            }
            if !sinks.insert(output.name.as_str()) {
                return Err(DefinitionError::Malformed(format!("duplicate output '{}'", output.name)));
            }
        }
        Ok(())
    }
}

/// Runtime node of a parsed pipeline.
struct Stage {
    id: String,
    progress: AtomicProgress,
}

impl ProgressSource for Stage {
    fn progress(&self) -> Option<f32> {
        self.progress.get()
    }
}

impl ProcessObject for Stage {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_progress_source(&self) -> Option<&dyn ProgressSource> {
        Some(self)
    }
}

struct Sink {
    name: String,
}

impl Renderer for Sink {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A loaded TOML pipeline.
pub struct TomlPipeline {
    file: PipelineFile,
    path: PathBuf,
    image: Option<ImageHandle>,
    stages: Vec<Arc<Stage>>,
    sinks: Vec<Arc<Sink>>,
    results: BTreeMap<String, serde_json::Value>,
}

impl TomlPipeline {
    fn new(file: PipelineFile, path: &Path) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            image: None,
            stages: Vec::new(),
            sinks: Vec::new(),
            results: BTreeMap::new(),
        }
    }
}

impl PipelineDefinition for TomlPipeline {
    fn info(&self) -> PipelineInfo {
        PipelineInfo {
            name: self.file.name.clone(),
            description: self.file.description.clone(),
            path: self.path.clone(),
        }
    }

    fn parse(&mut self, bindings: &Bindings) -> Result<(), DefinitionError> {
        let image = bindings.require(&self.file.input)?;
        if !image.path.is_file() {
            return Err(DefinitionError::Unreadable {
                path: image.path.clone(),
                reason: "image file not found".to_string(),
            });
        }

        self.image = Some(image.clone());
        self.stages = self
            .file
            .stages
            .iter()
            .map(|spec| Arc::new(Stage { id: spec.id().to_string(), progress: AtomicProgress::new() }))
            .collect();
        self.sinks = self.file.outputs.iter().map(|o| Arc::new(Sink { name: o.name.clone() })).collect();
        self.results.clear();
        Ok(())
    }

    fn renderers(&self) -> Vec<Arc<dyn Renderer>> {
        self.sinks.iter().map(|s| s.clone() as Arc<dyn Renderer>).collect()
    }

    fn process_objects(&self) -> Vec<Arc<dyn ProcessObject>> {
        self.stages.iter().map(|s| s.clone() as Arc<dyn ProcessObject>).collect()
    }

    fn execute(&mut self, control: &ExecutionControl) -> Result<(), ExecutionError> {
        let image = self.image.as_ref().ok_or_else(|| ExecutionError::Fault {
            stage: self.file.input.clone(),
            reason: "pipeline executed before its input was bound".to_string(),
        })?;

        // Each patch generator and the digests after it form one pass over
        // the image. Validation guarantees the first stage is a generator.
        let mut start = 0;
        while start < self.file.stages.len() {
            let end = self.file.stages[start + 1..]
                .iter()
                .position(|spec| matches!(spec, StageSpec::PatchGenerator { .. }))
                .map_or(self.file.stages.len(), |offset| start + 1 + offset);

            let StageSpec::PatchGenerator { tile_size, delay_ms, .. } = &self.file.stages[start] else {
                return Err(ExecutionError::Fault {
                    stage: self.file.stages[start].id().to_string(),
                    reason: "digest stage has no upstream patch-generator".to_string(),
                });
            };
            let source = TileSource { tile_size: *tile_size, delay: Duration::from_millis(*delay_ms) };
            let group = &self.stages[start..end];
            let values = stream_tiles(&image.path, &source, &group[0], &group[1..], control)?;

            for (stage, value) in group.iter().zip(values) {
                stage.progress.set(1.0);
                debug!(stage = %stage.id, image = %image.id, "Stage finished");
                self.results.insert(stage.id.clone(), value);
            }
            start = end;
        }
        Ok(())
    }

    fn output_data(&self) -> PipelineOutput {
        self.file
            .outputs
            .iter()
            .map(|o| OutputData {
                name: o.name.clone(),
                value: self.results.get(&o.stage).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

struct TileSource {
    tile_size: usize,
    delay: Duration,
}

/// Reads the image once, tile by tile, feeding every tile to `digests`.
///
/// Only the current tile is held in memory.
///
/// # Returns
/// One result value for `generator` followed by one per digest.
fn stream_tiles(
    path: &Path,
    source: &TileSource,
    generator: &Stage,
    digests: &[Arc<Stage>],
    control: &ExecutionControl,
) -> Result<Vec<serde_json::Value>, ExecutionError> {
    let fault = |e: std::io::Error| ExecutionError::Fault {
        stage: generator.id.clone(),
        reason: format!("{}: {}", path.display(), e),
    };
    let file = File::open(path).map_err(fault)?;
    let len = file.metadata().map_err(fault)?.len();
    let tile_size = u64::try_from(source.tile_size).unwrap_or(u64::MAX);
    let count = len.div_ceil(tile_size).max(1);

    let mut reader = BufReader::new(file);
    let mut hashers: Vec<Sha256> = digests.iter().map(|_| Sha256::new()).collect();
    let mut tile = Vec::with_capacity(source.tile_size);
    let (mut tiles, mut bytes) = (0_u64, 0_u64);

    loop {
        control.checkpoint()?;
        tile.clear();
        let read = (&mut reader).take(tile_size).read_to_end(&mut tile).map_err(fault)?;
        if read == 0 {
            break;
        }
        if !source.delay.is_zero() {
            thread::sleep(source.delay);
        }
        for hasher in &mut hashers {
            hasher.update(&tile);
        }

        tiles += 1;
        bytes += tile.len() as u64;
        let fraction = (tiles as f64 / count as f64) as f32;
        generator.progress.set(fraction);
        for digest in digests {
            digest.progress.set(fraction);
        }
    }

    let mut values = vec![serde_json::json!({ "tiles": tiles, "bytes": bytes })];
    values.extend(
        hashers
            .into_iter()
            .map(|hasher| serde_json::json!({ "sha256": hex::encode(hasher.finalize()), "tiles": tiles })),
    );
    Ok(values)
}

/// Loads [`TomlPipeline`]s from `*.toml` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlPipelineLoader;

impl PipelineLoader for TomlPipelineLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PipelineDefinition>, DefinitionError> {
        let content = std::fs::read_to_string(path).map_err(|e| DefinitionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: PipelineFile = toml::from_str(&content)
            .map_err(|e| DefinitionError::Malformed(format!("{}: {}", path.display(), e)))?;
        file.validate()?;

        debug!(path = %path.display(), name = %file.name, stages = file.stages.len(), "Pipeline definition loaded");
        Ok(Box::new(TomlPipeline::new(file, path)))
    }
}
