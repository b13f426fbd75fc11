//! Background pipeline worker.
//!
//! A worker is one OS thread that owns one run to completion:
//!
//! 1. acquire the transferred execution context (make it current)
//! 2. bind the target image into the pipeline definition
//! 3. execute the pipeline, polling the cancellation signal between steps
//! 4. release the context and signal the outcome
//!
//! The worker never touches interactive-thread state. Everything it has to say
//! goes through a [`WorkerEvent`] on an unbounded channel that the orchestrator
//! drains on the interactive thread. The released context travels back through
//! the thread's join handle.
//!
//! Exactly one terminal signal is sent per run, even if a collaborator panics
//! outside the guarded pipeline calls.

use crate::context::ContextHandle;
use crate::error::{ContextError, DefinitionError, ExecutionError, OrchestrationError, Result};
use crate::lifecycle::RunId;
use crate::pipeline::{
    Bindings, ExecutionControl, PipelineDefinition, PipelineOutput, ProcessObject, Renderer,
};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Signals sent from a worker to the orchestrator.
pub enum WorkerEvent {
    /// Inputs were bound; the pipeline is about to execute.
    Parsed {
        run_id: RunId,
        renderers: Vec<Arc<dyn Renderer>>,
        stages: Vec<Arc<dyn ProcessObject>>,
    },
    /// Binding failed. Recoverable: execution never started.
    ParseFailed { run_id: RunId, error: DefinitionError },
    /// The execution context could not be made current on the worker.
    ContextUnavailable { run_id: RunId, error: ContextError },
    /// Execution finished and all outputs are final.
    Completed { run_id: RunId, output: PipelineOutput },
    /// Unrecoverable fault during execution.
    CriticalError { run_id: RunId, error: String },
    /// The worker observed the stop request and unwound.
    Cancelled { run_id: RunId },
}

impl WorkerEvent {
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Parsed { run_id, .. }
            | Self::ParseFailed { run_id, .. }
            | Self::ContextUnavailable { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::CriticalError { run_id, .. }
            | Self::Cancelled { run_id } => *run_id,
        }
    }
}

impl fmt::Debug for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed { run_id, renderers, stages } => f
                .debug_struct("Parsed")
                .field("run_id", run_id)
                .field("renderers", &renderers.len())
                .field("stages", &stages.len())
                .finish(),
            Self::ParseFailed { run_id, error } => {
                f.debug_struct("ParseFailed").field("run_id", run_id).field("error", error).finish()
            }
            Self::ContextUnavailable { run_id, error } => {
                f.debug_struct("ContextUnavailable").field("run_id", run_id).field("error", error).finish()
            }
            Self::Completed { run_id, output } => {
                f.debug_struct("Completed").field("run_id", run_id).field("outputs", &output.len()).finish()
            }
            Self::CriticalError { run_id, error } => {
                f.debug_struct("CriticalError").field("run_id", run_id).field("error", error).finish()
            }
            Self::Cancelled { run_id } => f.debug_struct("Cancelled").field("run_id", run_id).finish(),
        }
    }
}

/// Everything a worker needs for one run. Moved into the worker thread.
pub struct WorkerJob {
    pub run_id: RunId,
    pub definition: Box<dyn PipelineDefinition>,
    pub bindings: Bindings,
    pub context: ContextHandle,
}

/// Handle to a running worker thread.
pub struct Worker {
    run_id: RunId,
    cancel: CancellationToken,
    handle: Option<JoinHandle<ContextHandle>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("joined", &self.handle.is_none())
            .finish()
    }
}

impl Worker {
    /// Spawns a named worker thread for `job`.
    pub fn spawn(
        job: WorkerJob,
        thread_name: &str,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let run_id = job.run_id;
        let cancel = CancellationToken::new();
        let control = ExecutionControl::new(cancel.clone());

        let handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run_job(job, &control, &events))
            .map_err(|e| OrchestrationError::WorkerSpawn(e.to_string()))?;

        debug!(run_id = %run_id, thread = thread_name, "Pipeline worker spawned");
        Ok(Self { run_id, cancel, handle: Some(handle) })
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Asks the worker to stop at its next cancellation checkpoint.
    pub fn request_stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(run_id = %self.run_id, "Requesting pipeline worker stop");
            self.cancel.cancel();
        }
    }

    /// Blocks until the worker thread has exited.
    ///
    /// # Returns
    /// The released execution context, or `None` if the thread panicked
    /// outside the guarded pipeline calls.
    pub fn join(mut self) -> Option<ContextHandle> {
        self.join_inner()
    }

    /// Requests a stop and blocks until the worker has exited.
    pub fn stop(self) -> Option<ContextHandle> {
        self.request_stop();
        self.join()
    }

    fn join_inner(&mut self) -> Option<ContextHandle> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(context) => {
                debug!(run_id = %self.run_id, "Pipeline worker joined");
                Some(context)
            }
            Err(panic) => {
                error!(run_id = %self.run_id, panic = %panic_message(panic.as_ref()), "Pipeline worker panicked");
                None
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!(run_id = %self.run_id, "Pipeline worker dropped while running; stopping it");
            self.cancel.cancel();
            if let Some(context) = self.join_inner() {
                context.dispose();
            }
        }
    }
}

/// Sends the run's terminal signal exactly once.
///
/// If the thread unwinds before [`TerminalSignal::send`] is reached, dropping
/// the guard reports a critical error so the orchestrator still tears down.
struct TerminalSignal<'a> {
    run_id: RunId,
    events: &'a mpsc::UnboundedSender<WorkerEvent>,
    sent: bool,
}

impl<'a> TerminalSignal<'a> {
    fn new(run_id: RunId, events: &'a mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { run_id, events, sent: false }
    }

    fn send(mut self, event: WorkerEvent) {
        self.sent = true;
        let _ = self.events.send(event);
    }
}

impl Drop for TerminalSignal<'_> {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        let error = if thread::panicking() {
            "Pipeline worker panicked outside the pipeline".to_string()
        } else {
            "Pipeline worker exited without an outcome".to_string()
        };
        error!(run_id = %self.run_id, error = %error, "Pipeline worker aborted");
        let _ = self.events.send(WorkerEvent::CriticalError { run_id: self.run_id, error });
    }
}

/// Thread body. Returns the released context unless a collaborator panicked
/// while the context was current.
fn run_job(
    job: WorkerJob,
    control: &ExecutionControl,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) -> ContextHandle {
    let WorkerJob { run_id, mut definition, bindings, context } = job;
    let signal = TerminalSignal::new(run_id, events);
    info!(run_id = %run_id, thread = ?thread::current().name(), "Pipeline worker started");

    let current = match context.acquire() {
        Ok(current) => current,
        Err((context, error)) => {
            error!(run_id = %run_id, error = %error, "Unable to acquire execution context");
            signal.send(WorkerEvent::ContextUnavailable { run_id, error });
            return context;
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        process(run_id, definition.as_mut(), &bindings, control, events)
    }))
    .unwrap_or_else(|panic| WorkerEvent::CriticalError {
        run_id,
        error: format!("Pipeline panicked: {}", panic_message(panic.as_ref())),
    });

    // Pipeline resources go away while the context is still current.
    drop(definition);
    let context = current.release();

    info!(run_id = %run_id, outcome = ?outcome, "Pipeline worker finished");
    signal.send(outcome);
    context
}

/// Parse and execute phases. Returns the terminal event.
fn process(
    run_id: RunId,
    definition: &mut dyn PipelineDefinition,
    bindings: &Bindings,
    control: &ExecutionControl,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) -> WorkerEvent {
    if control.is_cancelled() {
        return WorkerEvent::Cancelled { run_id };
    }

    if let Err(error) = definition.parse(bindings) {
        warn!(run_id = %run_id, error = %error, "Pipeline parse failed");
        return WorkerEvent::ParseFailed { run_id, error };
    }

    let _ = events.send(WorkerEvent::Parsed {
        run_id,
        renderers: definition.renderers(),
        stages: definition.process_objects(),
    });

    match definition.execute(control) {
        Ok(()) if control.is_cancelled() => WorkerEvent::Cancelled { run_id },
        Ok(()) => WorkerEvent::Completed { run_id, output: definition.output_data() },
        Err(ExecutionError::Cancelled) => WorkerEvent::Cancelled { run_id },
        Err(fault @ ExecutionError::Fault { .. }) => {
            error!(run_id = %run_id, error = %fault, "Pipeline execution fault");
            WorkerEvent::CriticalError { run_id, error: fault.to_string() }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
