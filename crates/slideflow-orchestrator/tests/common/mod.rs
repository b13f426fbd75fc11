//! Scripted fake collaborators shared by the orchestrator integration tests.

#![allow(dead_code)]

use slideflow_orchestrator::{
    AtomicProgress, Bindings, Collaborators, ContextError, ContextFactory, DefinitionError,
    ExecutionContext, ExecutionControl, ExecutionError, ImageHandle, ImageId, OrchestratorConfig,
    OrchestratorEvent, OutputData, PipelineDefinition, PipelineInfo, PipelineLoader,
    PipelineOrchestrator, PipelineOutput, ProcessObject, ProgressSource, ProjectProvider,
    RenderSurface, Renderer, RunStatus,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::broadcast;

/// How a scripted pipeline behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub steps: usize,
    pub step_delay: Duration,
    pub renderers: Vec<String>,
    /// Execution faults when this image is bound.
    pub fault_on: Option<String>,
    /// Execution panics when this image is bound.
    pub panic_on: Option<String>,
    /// Binding requires an input that is never provided.
    pub bind_fails: bool,
    /// Dropping the definition panics, after execution has finished.
    pub panic_on_drop: bool,
}

impl Script {
    pub fn quick(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: 4,
            step_delay: Duration::from_millis(2),
            renderers: vec!["overlay".to_string()],
            fault_on: None,
            panic_on: None,
            bind_fails: false,
            panic_on_drop: false,
        }
    }

    /// Runs long enough to be cancelled mid-way.
    pub fn slow(name: &str) -> Self {
        Self { steps: 500, step_delay: Duration::from_millis(10), ..Self::quick(name) }
    }
}

struct Stage {
    progress: AtomicProgress,
}

impl ProgressSource for Stage {
    fn progress(&self) -> Option<f32> {
        self.progress.get()
    }
}

impl ProcessObject for Stage {
    fn id(&self) -> &str {
        "stage"
    }
    fn as_progress_source(&self) -> Option<&dyn ProgressSource> {
        Some(self)
    }
}

struct Sink(String);

impl Renderer for Sink {
    fn name(&self) -> &str {
        &self.0
    }
}

struct ScriptedPipeline {
    script: Script,
    path: PathBuf,
    image: Option<ImageId>,
    stage: Arc<Stage>,
    threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl PipelineDefinition for ScriptedPipeline {
    fn info(&self) -> PipelineInfo {
        PipelineInfo {
            name: self.script.name.clone(),
            description: format!("{} steps", self.script.steps),
            path: self.path.clone(),
        }
    }

    fn parse(&mut self, bindings: &Bindings) -> Result<(), DefinitionError> {
        if self.script.bind_fails {
            bindings.require("Mask")?;
        }
        self.image = Some(bindings.require("WSI")?.id.clone());
        Ok(())
    }

    fn renderers(&self) -> Vec<Arc<dyn Renderer>> {
        self.script.renderers.iter().map(|n| Arc::new(Sink(n.clone())) as Arc<dyn Renderer>).collect()
    }

    fn process_objects(&self) -> Vec<Arc<dyn ProcessObject>> {
        vec![self.stage.clone() as Arc<dyn ProcessObject>]
    }

    fn execute(&mut self, control: &ExecutionControl) -> Result<(), ExecutionError> {
        self.threads.lock().unwrap().push(thread::current().id());
        let image = self.image.as_ref().map(ImageId::as_str);

        for step in 0..self.script.steps {
            control.checkpoint()?;
            if step == self.script.steps / 2 {
                if image.is_some() && image == self.script.fault_on.as_deref() {
                    return Err(ExecutionError::Fault {
                        stage: "stage".to_string(),
                        reason: "out of memory".to_string(),
                    });
                }
                if image.is_some() && image == self.script.panic_on.as_deref() {
                    panic!("stage exploded");
                }
            }
            thread::sleep(self.script.step_delay);
            self.stage.progress.set((step + 1) as f32 / self.script.steps as f32);
        }
        Ok(())
    }

    fn output_data(&self) -> PipelineOutput {
        vec![OutputData {
            name: "overlay".to_string(),
            value: serde_json::json!({ "image": self.image.as_ref().map(ImageId::as_str) }),
        }]
    }
}

impl Drop for ScriptedPipeline {
    fn drop(&mut self) {
        if self.script.panic_on_drop && !thread::panicking() {
            panic!("pipeline teardown exploded");
        }
    }
}

/// Loader serving scripts by path. Unknown paths are malformed definitions.
#[derive(Default)]
pub struct ScriptedLoader {
    scripts: Mutex<HashMap<PathBuf, Script>>,
    pub loads: AtomicUsize,
    pub execute_threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl ScriptedLoader {
    pub fn add(&self, path: &str, script: Script) -> PathBuf {
        let path = PathBuf::from(path);
        self.scripts.lock().unwrap().insert(path.clone(), script);
        path
    }
}

impl PipelineLoader for ScriptedLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PipelineDefinition>, DefinitionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| DefinitionError::Malformed(format!("unknown pipeline {}", path.display())))?;
        Ok(Box::new(ScriptedPipeline {
            script,
            path: path.to_path_buf(),
            image: None,
            stage: Arc::new(Stage { progress: AtomicProgress::new() }),
            threads: self.execute_threads.clone(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    StopPipeline,
    RemoveAllRenderers,
    AddRenderer(String),
    ShowImage(ImageId),
}

#[derive(Default)]
pub struct RecordingSurface {
    pub calls: Mutex<Vec<SurfaceCall>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Renderers attached since the last `remove_all_renderers`.
    pub fn attached(&self) -> Vec<String> {
        let mut attached = Vec::new();
        for call in self.calls() {
            match call {
                SurfaceCall::AddRenderer(name) => attached.push(name),
                SurfaceCall::RemoveAllRenderers => attached.clear(),
                SurfaceCall::StopPipeline | SurfaceCall::ShowImage(_) => {}
            }
        }
        attached
    }
}

impl RenderSurface for RecordingSurface {
    fn stop_pipeline(&self) {
        self.calls.lock().unwrap().push(SurfaceCall::StopPipeline);
    }
    fn remove_all_renderers(&self) {
        self.calls.lock().unwrap().push(SurfaceCall::RemoveAllRenderers);
    }
    fn add_renderer(&self, renderer: Arc<dyn Renderer>) {
        self.calls.lock().unwrap().push(SurfaceCall::AddRenderer(renderer.name().to_string()));
    }
    fn show_image(&self, image: &ImageHandle) {
        self.calls.lock().unwrap().push(SurfaceCall::ShowImage(image.id.clone()));
    }
}

#[derive(Default)]
pub struct MemoryProject {
    pub images: Vec<ImageId>,
    pub current: Option<ImageId>,
    pub fail_save: bool,
    pub saved: Mutex<Vec<(ImageId, String)>>,
}

impl MemoryProject {
    pub fn with_images(n: usize) -> Self {
        let images: Vec<_> = (0..n).map(|i| ImageId::new(format!("slide-{i}"))).collect();
        Self { current: images.first().cloned(), images, ..Self::default() }
    }

    pub fn saved_images(&self) -> Vec<ImageId> {
        self.saved.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

impl ProjectProvider for MemoryProject {
    fn image_ids(&self) -> Vec<ImageId> {
        self.images.clone()
    }

    fn image(&self, id: &ImageId) -> Option<ImageHandle> {
        self.images
            .contains(id)
            .then(|| ImageHandle::new(id.as_str(), format!("/slides/{id}.tiff")))
    }

    fn current_image(&self) -> Option<ImageId> {
        self.current.clone()
    }

    fn save_results(
        &self,
        image: &ImageId,
        pipeline: &PipelineInfo,
        _output: &PipelineOutput,
    ) -> Result<(), String> {
        if self.fail_save {
            return Err("disk full".to_string());
        }
        self.saved.lock().unwrap().push((image.clone(), pipeline.name.clone()));
        Ok(())
    }
}

/// Context that refuses to be current on two threads at once.
struct TrackedContext {
    /// Only this thread may make the context current, when set.
    home: Option<ThreadId>,
    current: Arc<Mutex<Option<ThreadId>>>,
    disposed: Arc<AtomicUsize>,
    acquired_on: Arc<Mutex<Vec<ThreadId>>>,
}

impl ExecutionContext for TrackedContext {
    fn is_valid(&self) -> bool {
        true
    }
    fn is_sharing(&self) -> bool {
        true
    }
    fn make_current(&mut self) -> Result<(), ContextError> {
        if self.home.is_some_and(|home| home != thread::current().id()) {
            return Err(ContextError::MakeCurrent("context is bound to its creating thread".to_string()));
        }
        let mut current = self.current.lock().unwrap();
        if let Some(owner) = *current {
            return Err(ContextError::MakeCurrent(format!("already current on {owner:?}")));
        }
        *current = Some(thread::current().id());
        self.acquired_on.lock().unwrap().push(thread::current().id());
        Ok(())
    }
    fn done_current(&mut self) {
        *self.current.lock().unwrap() = None;
    }
}

impl Drop for TrackedContext {
    fn drop(&mut self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct TrackingContexts {
    /// Creation fails while set.
    pub fail: AtomicBool,
    /// Created contexts can only be made current on the creating thread.
    pub pinned: bool,
    pub created: AtomicUsize,
    pub disposed: Arc<AtomicUsize>,
    pub acquired_on: Arc<Mutex<Vec<ThreadId>>>,
}

impl ContextFactory for TrackingContexts {
    fn create_shared(&self) -> Result<Box<dyn ExecutionContext>, ContextError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ContextError::Creation("no GPU available".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackedContext {
            home: self.pinned.then(|| thread::current().id()),
            current: Arc::default(),
            disposed: self.disposed.clone(),
            acquired_on: self.acquired_on.clone(),
        }))
    }
}

pub struct Harness {
    pub orchestrator: PipelineOrchestrator,
    pub events: broadcast::Receiver<OrchestratorEvent>,
    pub loader: Arc<ScriptedLoader>,
    pub surface: Arc<RecordingSurface>,
    pub project: Arc<MemoryProject>,
    pub contexts: Arc<TrackingContexts>,
}

impl Harness {
    pub fn new(project: MemoryProject) -> Self {
        Self::with_contexts(project, TrackingContexts::default())
    }

    pub fn with_contexts(project: MemoryProject, contexts: TrackingContexts) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("slideflow_orchestrator=debug").try_init();

        let loader = Arc::new(ScriptedLoader::default());
        let surface = Arc::new(RecordingSurface::default());
        let project = Arc::new(project);
        let contexts = Arc::new(contexts);
        let config = OrchestratorConfig {
            progress_interval_ms: 5,
            event_capacity: 4096,
            ..OrchestratorConfig::default()
        };

        let orchestrator = PipelineOrchestrator::new(
            config,
            Collaborators {
                loader: loader.clone(),
                contexts: contexts.clone(),
                surface: surface.clone(),
                project: project.clone(),
            },
        );
        let events = orchestrator.subscribe();
        Self { orchestrator, events, loader, surface, project, contexts }
    }

    /// Drives the orchestrator to idle, failing the test after 10 seconds.
    pub async fn run_until_idle(&mut self) {
        tokio::time::timeout(Duration::from_secs(10), self.orchestrator.run_until_idle())
            .await
            .expect("orchestrator did not become idle");
    }

    /// Handles worker signals until the active run reaches `status`.
    pub async fn wait_for_status(&mut self, status: RunStatus) {
        let wait = async {
            while self.orchestrator.status() != Some(status) {
                self.orchestrator.process_pending_events();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("run did not reach the expected status");
    }

    /// Every event emitted so far.
    pub fn drain_events(&mut self) -> Vec<OrchestratorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn disposed(&self) -> usize {
        self.contexts.disposed.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.contexts.created.load(Ordering::SeqCst)
    }
}

pub fn messages(events: &[OrchestratorEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::Message { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn finished(events: &[OrchestratorEvent]) -> Vec<ImageId> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::Finished { image } => Some(image.clone()),
            _ => None,
        })
        .collect()
}

pub fn progress(events: &[OrchestratorEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::ProgressChanged { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

pub fn started(events: &[OrchestratorEvent]) -> Vec<(ImageId, Option<usize>, u32)> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::RunStarted { image, batch_index, maximum, .. } => {
                Some((image.clone(), *batch_index, *maximum))
            }
            _ => None,
        })
        .collect()
}
