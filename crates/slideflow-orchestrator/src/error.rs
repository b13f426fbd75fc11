// Error types for pipeline orchestration

use std::path::PathBuf;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Errors raised by a pipeline definition while loading or binding inputs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    /// The definition file could not be read
    #[error("Unable to read pipeline file {path}: {reason}")]
    Unreadable {
        /// Path of the definition file
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// The definition is malformed
    #[error("Malformed pipeline definition: {0}")]
    Malformed(String),

    /// A required input binding was not supplied
    #[error("Missing required input binding '{0}'")]
    MissingBinding(String),
}

/// Errors raised while a parsed pipeline executes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Execution observed the cancellation signal and unwound
    #[error("Execution cancelled")]
    Cancelled,

    /// Unrecoverable fault inside a pipeline stage
    #[error("Execution fault in stage '{stage}': {reason}")]
    Fault {
        /// Stage that failed
        stage: String,
        /// Failure description
        reason: String,
    },
}

/// Errors raised by the shared execution context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    /// The context could not be created
    #[error("Unable to create execution context: {0}")]
    Creation(String),

    /// The context was created but is not usable
    #[error("The execution context is invalid")]
    Invalid,

    /// The context does not share resources with the rendering surface
    #[error("The execution context is not sharing with the rendering surface")]
    NotSharing,

    /// The context could not be made current on the calling thread
    #[error("Unable to make execution context current: {0}")]
    MakeCurrent(String),
}

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Pipeline definition could not be loaded or bound (recoverable)
    #[error("Error parsing pipeline! {0}")]
    DefinitionParse(#[from] DefinitionError),

    /// Unrecoverable failure during pipeline execution
    #[error("Pipeline execution failed: {0}")]
    ExecutionFault(String),

    /// Shared execution context unavailable; the run was not started
    #[error("Execution context unavailable: {0}")]
    ContextAcquisition(#[from] ContextError),

    /// Requested image is not known to the project
    #[error("Image '{0}' not found in project")]
    MissingImage(String),

    /// Batch started with no images
    #[error("Batch contains no images")]
    EmptyBatch,

    /// Results could not be handed to the persistence collaborator
    #[error("Unable to save results for image '{image}': {reason}")]
    Persistence {
        /// Image the results belong to
        image: String,
        /// Failure description
        reason: String,
    },

    /// Worker thread could not be spawned
    #[error("Unable to spawn pipeline worker: {0}")]
    WorkerSpawn(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
