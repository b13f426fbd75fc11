//! Pipeline definition contract.
//!
//! The orchestrator never parses or executes pipeline graphs itself. It talks to
//! an external pipeline engine through the traits in this module:
//!
//! ```text
//! PipelineLoader ──load──▶ PipelineDefinition ──parse(bindings)──▶ execute(control)
//!                                 │
//!                                 ├── renderers()        (attached to the surface)
//!                                 ├── process_objects()  (polled for progress)
//!                                 └── output_data()      (handed to persistence)
//! ```

use crate::error::{DefinitionError, ExecutionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Identifier of an image in the current project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl ImageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to a (pyramidal) image that can be bound into a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    /// Project identifier of the image.
    pub id: ImageId,
    /// Location of the image data.
    pub path: PathBuf,
}

impl ImageHandle {
    #[must_use]
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { id: ImageId::new(id), path: path.into() }
    }
}

/// Named inputs bound into a pipeline definition at parse time.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    inputs: BTreeMap<String, ImageHandle>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `image` under `name`, replacing any previous binding.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, image: ImageHandle) -> Self {
        self.inputs.insert(name.into(), image);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ImageHandle> {
        self.inputs.get(name)
    }

    /// Looks up a binding the definition cannot run without.
    pub fn require(&self, name: &str) -> Result<&ImageHandle, DefinitionError> {
        self.get(name).ok_or_else(|| DefinitionError::MissingBinding(name.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Capability of a stage that can report fractional completion.
///
/// Implementations are read from the interactive thread while the stage runs on
/// the worker, so `progress` must be a lock-free snapshot (see
/// [`crate::progress::AtomicProgress`]).
pub trait ProgressSource: Send + Sync {
    /// Fraction complete in `0.0..=1.0`, or `None` before the stage has started.
    fn progress(&self) -> Option<f32>;
}

/// One node of a parsed pipeline.
pub trait ProcessObject: Send + Sync {
    /// Stage identifier, unique within its pipeline.
    fn id(&self) -> &str;

    /// Returns the progress capability when the stage has one.
    fn as_progress_source(&self) -> Option<&dyn ProgressSource> {
        None
    }
}

/// Output sink that displays pipeline results on the rendering surface.
pub trait Renderer: Send + Sync {
    /// Sink name as declared by the pipeline definition.
    fn name(&self) -> &str;
}

/// One named output of a completed pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputData {
    /// Sink or stage that produced the data.
    pub name: String,
    /// Engine-specific payload.
    pub value: serde_json::Value,
}

/// All outputs of a completed pipeline, in declaration order.
pub type PipelineOutput = Vec<OutputData>;

/// Display information about a pipeline, kept after the definition is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// File the definition was loaded from.
    pub path: PathBuf,
}

/// Cooperative cancellation handed to a running pipeline.
///
/// Engines call [`ExecutionControl::checkpoint`] between discrete steps; there is
/// no forced termination.
#[derive(Debug, Clone)]
pub struct ExecutionControl {
    token: CancellationToken,
}

impl ExecutionControl {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(ExecutionError::Cancelled)` once a stop was requested.
    pub fn checkpoint(&self) -> Result<(), ExecutionError> {
        if self.token.is_cancelled() {
            Err(ExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A declarative processing graph loaded from a file.
///
/// Owned by the worker thread once a run starts; only the `Arc`-shared
/// renderers and process objects are ever seen by the interactive thread.
pub trait PipelineDefinition: Send {
    fn info(&self) -> PipelineInfo;

    /// Binds named inputs (the target image) into the graph.
    fn parse(&mut self, bindings: &Bindings) -> Result<(), DefinitionError>;

    /// Output sinks to attach to the rendering surface. Valid after `parse`.
    fn renderers(&self) -> Vec<Arc<dyn Renderer>>;

    /// Stages of the graph. Valid after `parse`.
    fn process_objects(&self) -> Vec<Arc<dyn ProcessObject>>;

    /// Runs the graph to completion on the calling thread.
    fn execute(&mut self, control: &ExecutionControl) -> Result<(), ExecutionError>;

    /// All pipeline outputs. Valid after a successful `execute`.
    fn output_data(&self) -> PipelineOutput;
}

/// Creates pipeline definitions from files.
pub trait PipelineLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn PipelineDefinition>, DefinitionError>;

    /// File extensions of definition files, without the dot.
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }
}
