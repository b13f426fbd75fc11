//! Run and batch command implementation.
//!
//! Runs one pipeline on the selected image or on every image of the project,
//! with a progress bar over the whole run and Ctrl-C cancellation.

use super::Settings;
use crate::engine::TomlPipelineLoader;
use crate::project::DirectoryProject;
use crate::surface::{HeadlessContextFactory, HeadlessSurface};
use anyhow::{Context, anyhow, bail};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use slideflow_orchestrator::{
    Collaborators, ImageId, OrchestrationError, OrchestratorEvent, PipelineCatalog, PipelineOrchestrator,
    ProjectProvider,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// What to run the pipeline on.
#[derive(Debug, Clone)]
pub enum Target {
    /// The given image, or the first image of the project.
    Single(Option<String>),
    /// Every image of the project, in order.
    Project,
}

/// What the event stream said about the run.
#[derive(Debug, Default)]
struct Report {
    started: usize,
    finished: Option<ImageId>,
    messages: Vec<String>,
}

pub async fn execute(settings: &Settings, pipeline: &str, target: Target) -> anyhow::Result<()> {
    let mut project = DirectoryProject::open(&settings.root)
        .with_context(|| format!("Failed to open project at {}", settings.root.display()))?;
    let pipeline_path = resolve_pipeline(&project, pipeline)?;

    let batch = matches!(target, Target::Project);
    match &target {
        Target::Single(Some(image)) => {
            if !project.select(&ImageId::new(image.as_str())) {
                bail!("Image '{}' not found in {}", image, project.root().join("images").display());
            }
        }
        Target::Single(None) if project.current_image().is_none() => {
            bail!("No images found in {}", project.root().join("images").display());
        }
        Target::Single(None) => {}
        Target::Project if project.image_ids().is_empty() => {
            return Err(OrchestrationError::EmptyBatch.into());
        }
        Target::Project => {}
    }

    let title = if batch { "slideflow batch" } else { "slideflow run" };
    println!("{}", title.bold().cyan());
    println!("  Pipeline: {}", pipeline_path.display());

    let project = Arc::new(project);
    let surface = Arc::new(HeadlessSurface::new());
    let mut orchestrator = PipelineOrchestrator::new(
        settings.orchestrator.clone(),
        Collaborators {
            loader: Arc::new(TomlPipelineLoader),
            contexts: Arc::new(HeadlessContextFactory),
            surface: surface.clone(),
            project: project.clone(),
        },
    );

    let bar = progress_bar();
    let reporter = tokio::spawn(report(orchestrator.subscribe(), bar.clone()));

    let started = if batch {
        orchestrator.start_project_batch(&pipeline_path)
    } else {
        orchestrator.start_current(&pipeline_path)
    };
    let outcome = match started {
        Ok(_) => drive(&mut orchestrator).await,
        Err(e) => Err(e.into()),
    };

    // Dropping the orchestrator closes the event stream and ends the reporter.
    drop(orchestrator);
    let report = reporter.await.context("Progress reporter failed")?;
    bar.finish_and_clear();

    if outcome? {
        println!("{}", "Processing cancelled".yellow());
        bail!("Processing cancelled by user");
    }
    if let Some(text) = report.messages.first() {
        bail!("{text}");
    }
    let Some(last) = report.finished else {
        bail!("Processing stopped before completion");
    };

    let done = if batch { "Batch processing is done!" } else { "Processing is done!" };
    println!("{} {}", "✓".green(), done);
    println!("  Images processed: {}", report.started);
    println!("  Last image: {last}");
    let renderers = surface.renderers();
    if !renderers.is_empty() {
        println!("  Outputs: {}", renderers.join(", "));
    }
    println!("  Results: {}", project.root().join("results").display());
    Ok(())
}

/// Resolves a path, a file stem in `pipelines/`, or a pipeline name.
fn resolve_pipeline(project: &DirectoryProject, pipeline: &str) -> anyhow::Result<PathBuf> {
    let direct = PathBuf::from(pipeline);
    if direct.is_file() {
        return Ok(direct);
    }

    let folder = project.pipelines_dir();
    let by_stem = folder.join(format!("{pipeline}.toml"));
    if by_stem.is_file() {
        return Ok(by_stem);
    }

    let catalog = PipelineCatalog::discover(&folder, &TomlPipelineLoader)?;
    catalog
        .find(pipeline)
        .map(|info| info.path.clone())
        .ok_or_else(|| anyhow!("Pipeline '{}' not found in {}", pipeline, folder.display()))
}

/// Runs until idle or Ctrl-C.
///
/// # Returns
/// Whether the run was interrupted.
async fn drive(orchestrator: &mut PipelineOrchestrator) -> anyhow::Result<bool> {
    let interrupted = tokio::select! {
        () = orchestrator.run_until_idle() => false,
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            true
        }
    };

    if interrupted {
        warn!("Interrupted, cancelling pipeline run");
        orchestrator.cancel();
    }
    Ok(interrupted)
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

async fn report(mut events: broadcast::Receiver<OrchestratorEvent>, bar: ProgressBar) -> Report {
    let mut report = Report::default();
    loop {
        match events.recv().await {
            Ok(OrchestratorEvent::RunStarted { image, maximum, .. }) => {
                report.started += 1;
                bar.set_length(u64::from(maximum));
                bar.set_message(image.to_string());
            }
            Ok(OrchestratorEvent::ProgressChanged { percent }) => bar.set_position(u64::from(percent)),
            Ok(OrchestratorEvent::Message { text }) => report.messages.push(text),
            Ok(OrchestratorEvent::Finished { image }) => report.finished = Some(image),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress reporter lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    report
}
