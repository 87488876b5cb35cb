//! `FrameShift` CLI - Highlight what changed between two images.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frameshift::{imaging, AnalysisReport, Config, Pipeline};

/// Align two images of the same scene and report the regions that changed.
#[derive(Parser, Debug)]
#[command(name = "frameshift")]
#[command(version, about, long_about = None)]
struct Args {
    /// Earlier image path.
    #[arg(value_name = "BEFORE")]
    before: PathBuf,

    /// Later image path, used as the reference frame.
    #[arg(value_name = "AFTER")]
    after: PathBuf,

    /// JSON configuration file. Replaces the flags below when given.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Change threshold (0.0-1.0, exclusive). Lower values flag subtler changes.
    #[arg(short, long, default_value = "0.15", value_name = "FLOAT")]
    sensitivity: f32,

    /// Mix edge map differences into the difference field.
    #[arg(long)]
    edges: bool,

    /// Suppress backgrounds before comparing.
    #[arg(long)]
    remove_background: bool,

    /// Drop regions shaped like lines of text.
    #[arg(long)]
    filter_text: bool,

    /// Write the difference heat map PNG here.
    #[arg(long, value_name = "PATH")]
    heatmap: Option<PathBuf>,

    /// Write the annotated after image PNG here.
    #[arg(long, value_name = "PATH")]
    annotated: Option<PathBuf>,

    /// Print the JSON response instead of a summary.
    #[arg(long)]
    json: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("frameshift={log_level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn load_config(args: &Args) -> Result<Config> {
    if let Some(path) = &args.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        return Config::from_json(&raw).context("Failed to parse config file");
    }

    Ok(Config {
        remove_background: args.remove_background,
        use_edge_detection: args.edges,
        sensitivity: args.sensitivity,
        filter_text_regions: args.filter_text,
    })
}

fn run(args: &Args) -> Result<()> {
    for path in [&args.before, &args.after] {
        if !path.exists() {
            anyhow::bail!("Input file does not exist: {}", path.display());
        }
    }

    let config = load_config(args)?;
    let pipeline = Pipeline::new(config).context("Failed to initialize pipeline")?;

    let analysis = pipeline
        .analyze_files(&args.before, &args.after)
        .context("Failed to compare images")?;

    if let Some(path) = &args.heatmap {
        imaging::save_png(&analysis.heat_map, path).context("Failed to save heat map")?;
    }
    if let Some(path) = &args.annotated {
        imaging::save_png(&analysis.annotated, path).context("Failed to save annotated image")?;
    }

    if args.json {
        let report = AnalysisReport::from_analysis(&analysis).context("Failed to encode report")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} change(s), ssim {:.4}",
        analysis.changes_count(),
        analysis.ssim_score
    );
    for (rank, region) in analysis.top_regions().iter().enumerate() {
        let b = region.bbox;
        println!(
            "  #{:<2} x={:<5} y={:<5} {}x{}  area {:.0}  aspect {:.2}",
            rank + 1,
            b.x,
            b.y,
            b.width,
            b.height,
            region.area,
            region.aspect_ratio
        );
    }

    Ok(())
}
