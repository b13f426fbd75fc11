//! Pipeline execution orchestrator for slideflow.
//!
//! Runs image-processing pipelines on a background worker while the
//! interactive thread stays responsive: one active run at a time, a shared
//! execution context handed to the worker and back, aggregated progress,
//! sequential batches over a project's images, and a single teardown path for
//! cancellation and failures.
//!
//! The pipeline engine, rendering surface, project and execution contexts are
//! collaborators injected through the traits in [`pipeline`], [`surface`],
//! [`project`] and [`context`].

pub mod batch;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod project;
pub mod surface;
pub mod worker;

pub use batch::{BatchPlan, BatchSequencer, BatchState, BatchStep};
pub use catalog::PipelineCatalog;
pub use config::OrchestratorConfig;
pub use context::{ContextFactory, ContextHandle, CurrentContext, ExecutionContext};
pub use error::{ContextError, DefinitionError, ExecutionError, OrchestrationError, Result};
pub use events::{EventBus, OrchestratorEvent};
pub use lifecycle::{Run, RunId, RunStatus};
pub use orchestrator::{Collaborators, PipelineOrchestrator};
pub use pipeline::{
    Bindings, ExecutionControl, ImageHandle, ImageId, OutputData, PipelineDefinition, PipelineInfo,
    PipelineLoader, PipelineOutput, ProcessObject, ProgressSource, Renderer,
};
pub use progress::{AtomicProgress, ProgressAggregator};
pub use project::ProjectProvider;
pub use surface::RenderSurface;
pub use worker::{Worker, WorkerEvent, WorkerJob};
