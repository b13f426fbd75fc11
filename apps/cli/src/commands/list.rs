//! List command implementation.

use super::Settings;
use crate::engine::TomlPipelineLoader;
use crate::project::DirectoryProject;
use anyhow::Context;
use colored::Colorize;
use slideflow_orchestrator::{PipelineCatalog, ProjectProvider};

/// Prints the pipelines and images of the project.
pub fn execute(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let project = DirectoryProject::open(&settings.root)
        .with_context(|| format!("Failed to open project at {}", settings.root.display()))?;
    let catalog = PipelineCatalog::discover(&project.pipelines_dir(), &TomlPipelineLoader)
        .with_context(|| format!("Failed to read {}", project.pipelines_dir().display()))?;

    if json {
        let output = serde_json::json!({
            "pipelines": catalog.entries(),
            "images": project.image_ids(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "slideflow pipelines".bold().cyan());
    println!();
    if catalog.is_empty() {
        println!("  No pipelines found in {}", catalog.folder().display());
    }
    for info in catalog.entries() {
        let file = info.path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
        if info.description.is_empty() {
            println!("  {}  {}", info.name.bold(), file.dimmed());
        } else {
            println!("  {}  {}  {}", info.name.bold(), file.dimmed(), info.description);
        }
    }

    let images = project.image_ids();
    println!();
    println!("{} {}", "Images:".bold(), images.len());
    for image in images {
        println!("  {image}");
    }
    Ok(())
}
