use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facesort::{config, dispatch::Dispatcher, triage, OnnxEmbeddingSource};
use log::info;

#[derive(Parser)]
#[command(name = "facesort")]
#[command(
    version,
    about = "Sort event photos into per-person folders by face recognition"
)]
struct Cli {
    /// Config file (defaults to facesort.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match every event photo against a class and move/copy the matches
    Sort {
        /// Reference collection (class) under reference_root
        turma: String,
        /// Override the configured match threshold (cosine distance)
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Write a JSON report of every photo's outcome
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Build the reference catalog of a class and list its identities
    Catalog {
        /// Reference collection (class) under reference_root
        turma: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sort {
            turma,
            threshold,
            report,
        } => {
            let mut cfg = config::load_config(cli.config.as_deref())?;
            if let Some(threshold) = threshold {
                cfg.threshold = threshold;
            }
            sort(&cfg, &turma, report)
        }
        Commands::Catalog { turma } => {
            let cfg = config::load_config(cli.config.as_deref())?;
            list_catalog(&cfg, &turma)
        }
        Commands::Config => open_config(cli.config),
    }
}

fn open_source(cfg: &config::Config) -> Result<OnnxEmbeddingSource> {
    OnnxEmbeddingSource::new(
        &cfg.detector_model,
        &cfg.recognizer_model,
        cfg.score_threshold,
        cfg.nms_threshold,
    )
    .context("Failed to initialize face recognition models")
}

fn sort(cfg: &config::Config, turma: &str, report_path: Option<PathBuf>) -> Result<()> {
    cfg.validate()?;
    let paths = cfg.resolve(turma)?;

    info!("facesort {}", env!("CARGO_PKG_VERSION"));
    info!("Class: {}", turma);
    info!("Reference folder: {}", paths.reference_dir.display());
    info!("Event folder: {}", paths.probe_root.display());
    info!("Output folder: {}", paths.output_root.display());
    info!("Threshold: {:.3}", cfg.threshold);

    // Checked again by triage::run; failing here avoids loading the models first.
    if !paths.reference_dir.is_dir() {
        return Err(facesort::error::FatalError::ReferenceRootMissing(paths.reference_dir).into());
    }

    let mut source = open_source(cfg)?;
    let dispatcher = Dispatcher::new(&paths.output_root, cfg.on_conflict);
    let report = triage::run(&mut source, &paths, dispatcher, cfg.threshold)?;

    if let Some(path) = report_path {
        let data = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, data)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn list_catalog(cfg: &config::Config, turma: &str) -> Result<()> {
    let paths = cfg.resolve(turma)?;
    let mut source = open_source(cfg)?;
    let catalog = triage::load_catalog(&mut source, &paths.reference_dir)?;

    for identity in catalog.iter() {
        info!(
            "{}: {} photo(s), embedding dim {}",
            identity.label,
            identity.image_count,
            identity.centroid.dim()
        );
    }
    Ok(())
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.to_path_buf());
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
