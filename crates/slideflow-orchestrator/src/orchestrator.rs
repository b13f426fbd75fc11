//! Pipeline execution orchestrator.
//!
//! Owns the single active run, its worker thread and the shared execution
//! context, samples progress, sequences batches, and funnels every failure and
//! cancellation through one teardown routine.
//!
//! All methods run on the interactive thread. Worker signals are queued on a
//! channel and handled in emission order by [`PipelineOrchestrator::run_until_idle`]
//! or [`PipelineOrchestrator::process_pending_events`].

use crate::batch::{BatchPlan, BatchSequencer, BatchState, BatchStep};
use crate::config::OrchestratorConfig;
use crate::context::{ContextFactory, ContextHandle};
use crate::error::{OrchestrationError, Result};
use crate::events::{EventBus, OrchestratorEvent};
use crate::lifecycle::{Run, RunId, RunStatus};
use crate::pipeline::{
    Bindings, ImageHandle, ImageId, PipelineDefinition, PipelineLoader, PipelineOutput, ProcessObject,
};
use crate::progress::{ProgressAggregator, progress_maximum};
use crate::project::ProjectProvider;
use crate::surface::RenderSurface;
use crate::worker::{Worker, WorkerEvent, WorkerJob};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// External collaborators, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn PipelineLoader>,
    pub contexts: Arc<dyn ContextFactory>,
    pub surface: Arc<dyn RenderSurface>,
    pub project: Arc<dyn ProjectProvider>,
}

/// The run currently owned by the orchestrator.
struct ActiveRun {
    run: Run,
    worker: Option<Worker>,
    /// Stages of the parsed pipeline, empty until the worker reports `Parsed`.
    stages: Vec<Arc<dyn ProcessObject>>,
}

/// Applies pipeline definitions to images on a background worker.
pub struct PipelineOrchestrator {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    events: EventBus,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    active: Option<ActiveRun>,
    batch: BatchSequencer,
    progress: ProgressAggregator,
    last_status: Option<RunStatus>,
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.config)
            .field("active_run", &self.active.as_ref().map(|a| a.run.id))
            .field("status", &self.status())
            .field("batch", &self.batch.state())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let events = EventBus::new(config.event_capacity);
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        Self {
            config,
            collaborators,
            events,
            worker_tx,
            worker_rx,
            active: None,
            batch: BatchSequencer::new(),
            progress: ProgressAggregator::new(),
            last_status: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Subscribes to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Status of the active run, `None` when idle.
    #[must_use]
    pub fn status(&self) -> Option<RunStatus> {
        self.active.as_ref().map(|a| a.run.status())
    }

    /// Final status of the most recent run that is no longer active.
    #[must_use]
    pub fn last_status(&self) -> Option<RunStatus> {
        self.last_status
    }

    #[must_use]
    pub fn active_run(&self) -> Option<&Run> {
        self.active.as_ref().map(|a| &a.run)
    }

    #[must_use]
    pub fn batch_state(&self) -> BatchState {
        self.batch.state()
    }

    /// Last progress value reported for the current run.
    #[must_use]
    pub fn progress(&self) -> Option<u32> {
        self.progress.last()
    }

    /// Whether a run is active or a batch still has items pending.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some() || self.batch.is_batching()
    }

    /// Runs `pipeline` on one image.
    ///
    /// Any active run (and batch) is stopped first. The definition is loaded
    /// before that happens, so a malformed definition leaves everything as it
    /// was apart from the emitted message.
    ///
    /// # Errors
    /// Returns the error that prevented the run from starting; it has already
    /// been reported through a `Message` event.
    pub fn start_single(&mut self, pipeline: &Path, image: &ImageId) -> Result<RunId> {
        let (definition, handle) = self.prepare(pipeline, image).inspect_err(|e| self.report(e))?;

        self.batch.abort();
        self.launch(definition, handle, None).inspect_err(|e| self.abandon_launch(e))
    }

    /// Runs `pipeline` on the project's current image.
    ///
    /// # Returns
    /// `Ok(None)` without doing anything when no image is selected.
    pub fn start_current(&mut self, pipeline: &Path) -> Result<Option<RunId>> {
        let Some(image) = self.collaborators.project.current_image() else {
            debug!(pipeline = %pipeline.display(), "No current image, nothing to run");
            return Ok(None);
        };
        self.start_single(pipeline, &image).map(Some)
    }

    /// Runs `pipeline` over `images`, one after another.
    ///
    /// # Returns
    /// `Ok(None)` without doing anything when `images` is empty.
    pub fn start_batch(&mut self, pipeline: &Path, images: Vec<ImageId>) -> Result<Option<RunId>> {
        let Some(plan) = BatchPlan::new(pipeline, images) else {
            debug!(pipeline = %pipeline.display(), "Empty batch ignored");
            return Ok(None);
        };

        let first = &plan.images()[0];
        let (definition, handle) = self.prepare(pipeline, first).inspect_err(|e| self.report(e))?;

        // Stop the current run before the new plan replaces the batch state.
        self.stop_processing();
        self.batch.abort();
        self.batch.begin(plan);

        self.launch(definition, handle, Some(0)).map(Some).inspect_err(|e| self.abandon_launch(e))
    }

    /// Runs `pipeline` over every image of the project.
    pub fn start_project_batch(&mut self, pipeline: &Path) -> Result<Option<RunId>> {
        let images = self.collaborators.project.image_ids();
        self.start_batch(pipeline, images)
    }

    /// Cancels the active run and any pending batch items.
    ///
    /// Blocks until the worker thread has exited, then tears down output sinks
    /// and restores the idle view.
    ///
    /// # Returns
    /// `false` if there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        if !self.is_active() {
            debug!("Cancel requested while idle");
            return false;
        }
        info!(
            run_id = ?self.active.as_ref().map(|a| a.run.id),
            batch_index = ?self.batch.current_index(),
            "Cancelling pipeline run"
        );
        self.teardown(RunStatus::Cancelled);
        true
    }

    /// Drives the orchestrator until no run is active and no batch is pending.
    ///
    /// Worker signals are handled as they arrive; progress is sampled every
    /// `progress_interval_ms`. The future can be dropped between events (for
    /// example to call [`cancel`](Self::cancel)) without losing anything.
    pub async fn run_until_idle(&mut self) {
        let mut ticker = time::interval(self.config.progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_active() {
            tokio::select! {
                Some(event) = self.worker_rx.recv() => self.handle_worker_event(event),
                _ = ticker.tick() => self.tick(),
            }
        }
    }

    /// Handles every queued worker signal without blocking.
    ///
    /// # Returns
    /// Number of signals handled.
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.worker_rx.try_recv() {
            self.handle_worker_event(event);
            handled += 1;
        }
        handled
    }

    /// Samples progress of the running pipeline once.
    pub fn tick(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if active.run.status() != RunStatus::Running {
            return;
        }
        if let Some(percent) = self.progress.sample(&active.stages) {
            self.events.progress(percent);
        }
    }

    /// Handles one worker signal.
    pub fn handle_worker_event(&mut self, event: WorkerEvent) {
        let Some(active) = self.active.as_mut() else {
            debug!(event = ?event, "Ignoring worker signal while idle");
            return;
        };
        if active.run.id != event.run_id() {
            debug!(event = ?event, "Ignoring signal from superseded worker");
            return;
        }

        match event {
            WorkerEvent::Parsed { renderers, stages, .. } => {
                let _ = active.run.transition(RunStatus::Running);
                for renderer in renderers {
                    debug!(run_id = %active.run.id, renderer = renderer.name(), "Attaching renderer");
                    self.collaborators.surface.add_renderer(renderer);
                }
                active.stages = stages;
            }
            WorkerEvent::Completed { output, .. } => self.complete(output),
            WorkerEvent::ParseFailed { error, .. } => self.fail(error.into()),
            WorkerEvent::ContextUnavailable { error, .. } => self.fail(error.into()),
            WorkerEvent::CriticalError { error, .. } => self.fail(OrchestrationError::ExecutionFault(error)),
            WorkerEvent::Cancelled { .. } => self.teardown(RunStatus::Cancelled),
        }
    }

    /// Loads the definition and resolves the target without touching any state.
    fn prepare(
        &self,
        pipeline: &Path,
        image: &ImageId,
    ) -> Result<(Box<dyn PipelineDefinition>, ImageHandle)> {
        let handle = self
            .collaborators
            .project
            .image(image)
            .ok_or_else(|| OrchestrationError::MissingImage(image.to_string()))?;
        let definition = self.collaborators.loader.load(pipeline)?;
        Ok((definition, handle))
    }

    /// Stops the previous run and starts a worker for `definition`.
    fn launch(
        &mut self,
        definition: Box<dyn PipelineDefinition>,
        image: ImageHandle,
        batch_index: Option<usize>,
    ) -> Result<RunId> {
        self.stop_processing();

        let context = ContextHandle::create(self.collaborators.contexts.as_ref())?;
        let mut run = Run::new(definition.info(), image.id.clone(), batch_index);
        let job = WorkerJob {
            run_id: run.id,
            definition,
            bindings: Bindings::new().with(self.config.image_binding.clone(), image),
            context,
        };
        let worker = Worker::spawn(job, &self.config.worker_thread_name, self.worker_tx.clone())?;
        let _ = run.transition(RunStatus::Parsing);

        let run_id = run.id;
        info!(
            run_id = %run_id,
            pipeline = %run.pipeline.name,
            image = %run.image,
            batch_index = ?batch_index,
            "Pipeline run started"
        );

        self.progress.begin_run(batch_index);
        self.events.emit(OrchestratorEvent::RunStarted {
            run_id,
            image: run.image.clone(),
            batch_index,
            maximum: progress_maximum(self.batch.len()),
        });
        self.active = Some(ActiveRun { run, worker: Some(worker), stages: Vec::new() });
        Ok(run_id)
    }

    /// Handles a normal completion: persist, then finish or advance the batch.
    fn complete(&mut self, output: PipelineOutput) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        // The worker has already released the context and is exiting.
        if let Some(context) = active.worker.take().and_then(Worker::join) {
            context.dispose();
        }
        let _ = active.run.transition(RunStatus::Completed);

        let run = active.run;
        if let Err(reason) = self.collaborators.project.save_results(&run.image, &run.pipeline, &output) {
            self.last_status = Some(RunStatus::Failed);
            self.fail(OrchestrationError::Persistence { image: run.image.to_string(), reason });
            return;
        }
        self.last_status = Some(RunStatus::Completed);
        info!(run_id = %run.id, image = %run.image, outputs = output.len(), "Pipeline run completed");

        let percent = self.progress.complete();
        self.events.progress(percent);

        match self.batch.on_item_completed() {
            BatchStep::Single => self.events.finished(run.image),
            BatchStep::Finished { last, .. } => self.events.finished(last),
            BatchStep::Next { index, image, pipeline } => {
                info!(index, image = %image, "Processing next batch image");
                let started = self
                    .prepare(&pipeline, &image)
                    .and_then(|(definition, handle)| self.launch(definition, handle, Some(index)));
                if let Err(e) = started {
                    error!(error = %e, index, "Unable to start next batch image");
                    self.abandon_launch(&e);
                }
            }
        }
    }

    /// Reports `error` and tears everything down. Aborts any batch.
    fn fail(&mut self, error: OrchestrationError) {
        error!(error = %error, "Pipeline run failed");
        self.teardown(RunStatus::Failed);
        self.report(&error);
    }

    /// Cleans up after `launch` failed.
    ///
    /// The previous run was already released as `Cancelled` by then, so the
    /// failure is recorded here rather than by `teardown`.
    fn abandon_launch(&mut self, error: &OrchestrationError) {
        self.teardown(RunStatus::Failed);
        self.last_status = Some(RunStatus::Failed);
        self.report(error);
    }

    fn report(&self, error: &OrchestrationError) {
        warn!(error = %error, "Reporting pipeline error");
        self.events.message(error.to_string());
    }

    /// Stops and joins the active worker and detaches its output sinks.
    ///
    /// The run is marked `Cancelled` unless it already reached a final state.
    fn stop_processing(&mut self) {
        self.release_active(RunStatus::Cancelled);
        debug!("Stopping surface pipeline");
        self.collaborators.surface.stop_pipeline();
        self.collaborators.surface.remove_all_renderers();
    }

    fn release_active(&mut self, status: RunStatus) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        if let Some(context) = active.worker.take().and_then(Worker::stop) {
            context.dispose();
        }
        if !active.run.status().is_terminal() {
            let _ = active.run.transition(status);
        }
        info!(run_id = %active.run.id, status = %active.run.status(), "Pipeline run released");
        self.last_status = Some(active.run.status());
    }

    /// The single teardown routine for cancellation and every failure path.
    fn teardown(&mut self, status: RunStatus) {
        self.release_active(status);
        self.batch.abort();
        self.collaborators.surface.stop_pipeline();
        self.collaborators.surface.remove_all_renderers();
        self.restore_idle_view();
    }

    fn restore_idle_view(&self) {
        let project = &self.collaborators.project;
        if let Some(image) = project.current_image().and_then(|id| project.image(&id)) {
            debug!(image = %image.id, "Restoring idle view");
            self.collaborators.surface.show_image(&image);
        }
    }
}
