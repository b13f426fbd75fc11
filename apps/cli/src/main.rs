//! slideflow CLI - headless front end for the pipeline orchestrator
//!
//! Runs pipeline definitions from a project's `pipelines/` folder on the
//! images in its `images/` folder, one image or the whole project at a time.

mod commands;
mod config;
mod engine;
mod project;
mod surface;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, warn};
use tracing_subscriber::FmtSubscriber;

use commands::{Settings, list, run};
use config::CliConfig;

/// slideflow - run image-processing pipelines over whole-slide images
#[derive(Parser, Debug)]
#[command(
    name = "slideflow",
    author,
    version,
    about = "slideflow - background pipeline runs over whole-slide images"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Verbose output (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root containing images/, pipelines/ and results/
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file (replaces ~/.slideflow/config.toml and ./.slideflowrc)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the pipelines and images of the project
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a pipeline on one image
    ///
    /// PIPELINE is a definition file, a file stem in pipelines/, or a
    /// pipeline name.
    Run {
        pipeline: String,

        /// Image file name in images/ (defaults to the first image)
        #[arg(long)]
        image: Option<String>,
    },

    /// Run a pipeline on every image of the project, in order
    Batch { pipeline: String },
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (cli_config, skipped) = match &args.config {
        Some(path) => (CliConfig::load_from_file(path).context("Failed to load configuration")?, Vec::new()),
        None => CliConfig::discover_and_load(),
    };

    // Initialize tracing
    let level = if args.verbose {
        Level::DEBUG
    } else {
        parse_level(args.log_level.as_deref().or(cli_config.log_level.as_deref()).unwrap_or("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    for error in &skipped {
        warn!(error = %error, "Ignoring configuration file");
    }

    let settings = Settings {
        root: args.root.or(cli_config.root_folder).unwrap_or_else(|| PathBuf::from(".")),
        orchestrator: cli_config.orchestrator.unwrap_or_default(),
    };
    settings.orchestrator.validate()?;

    match args.command {
        Command::List { json } => list::execute(&settings, json),
        Command::Run { pipeline, image } => run::execute(&settings, &pipeline, run::Target::Single(image)).await,
        Command::Batch { pipeline } => run::execute(&settings, &pipeline, run::Target::Project).await,
    }
}
