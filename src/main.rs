// this_file: src/main.rs
//! Covrast CLI - rasterize paths into alpha coverage masks

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use covrast::batch::{self, JobSpec};
use covrast::config::RasterConfig;
use covrast::context::{RenderStyle, StrokeStyle};
use covrast::pool::ContextPool;
use covrast::renderer::{FillRule, PixelBounds};
use covrast::{logging, Path};
use log::{error, info};
use serde_json::json;
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Covrast - anti-aliased path coverage rasterizer
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: String,

    /// Enable quiet mode (only errors)
    #[arg(short = 'q', long, global = true, conflicts_with = "log_level")]
    quiet: bool,

    /// JSON configuration file; COVRAST_* variables override it
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rasterize one path and print a JSON summary
    Render {
        /// Path data, e.g. "M0 0 L10 0 L10 10 Z"
        path: String,

        /// Mask width in pixels
        #[arg(long, default_value_t = 64)]
        width: u32,

        /// Mask height in pixels
        #[arg(long, default_value_t = 64)]
        height: u32,

        /// Left edge of the mask in device pixels
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        x: i32,

        /// Top edge of the mask in device pixels
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        y: i32,

        /// User-to-device scale
        #[arg(long, default_value_t = 1.0)]
        scale: f32,

        /// Stroke with this width instead of filling
        #[arg(long)]
        stroke_width: Option<f32>,

        /// Dash pattern for strokes, comma separated
        #[arg(long, value_delimiter = ',', requires = "stroke_width")]
        dash: Vec<f32>,

        /// Offset into the dash pattern
        #[arg(long, default_value_t = 0.0)]
        dash_phase: f32,

        /// Fill with the even-odd rule
        #[arg(long)]
        even_odd: bool,

        /// Disable anti-aliasing
        #[arg(long)]
        no_aa: bool,

        /// Write the mask to this file (.png or .pgm)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a JSON batch, one JSONL result per job on stdout
    Batch {
        /// Input file (uses stdin if not specified)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for mask files; masks are not saved when omitted
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Validate JSON batch specification
    Validate {
        /// Input file (uses stdin if not specified)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the resolved configuration as JSON
    Config,

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet { "error".to_string() } else { cli.log_level.clone() };
    logging::init_logging(&log_level, cli.quiet);

    match cli.command {
        Commands::Render {
            path,
            width,
            height,
            x,
            y,
            scale,
            stroke_width,
            dash,
            dash_phase,
            even_odd,
            no_aa,
            output,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let mut style = RenderStyle::fill(PixelBounds::new(x, y, width, height))
                .with_scale(scale)
                .with_antialias(!no_aa);
            if even_odd {
                style = style.with_fill_rule(FillRule::EvenOdd);
            }
            if let Some(width) = stroke_width {
                style.stroke = Some(StrokeStyle::dashed(width, dash, dash_phase));
            }
            render_one(config, &path, &style, output)?;
        }
        Commands::Batch { input, output_dir } => {
            let config = load_config(cli.config.as_ref())?;
            process_batch(config, input, output_dir)?;
        }
        Commands::Validate { input } => {
            validate_spec(input)?;
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("covrast version {}", covrast::VERSION);
            println!("Anti-aliased path coverage rasterizer");
        }
    }

    Ok(())
}

/// Configuration file (or defaults) overridden by the environment
fn load_config(path: Option<&PathBuf>) -> Result<RasterConfig> {
    let mut config = match path {
        Some(path) => RasterConfig::from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RasterConfig::default(),
    };
    config.apply_env(std::env::vars())?;
    config.validate()?;
    Ok(config)
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

/// Rasterize a single path
fn render_one(config: RasterConfig, data: &str, style: &RenderStyle, output: Option<PathBuf>) -> Result<()> {
    let path: Path = data.parse()?;
    let pool = ContextPool::new(config)?;
    let mut context = pool.acquire()?;
    let mut mask = context.new_mask()?;
    let outcome = context.render(&path, style, &mut mask)?;
    let stats = context.stats();
    drop(context);

    if let Some(file) = &output {
        mask.save(file)?;
        info!("Wrote mask to {}", file.display());
    }

    let summary = json!({
        "width": style.clip.width,
        "height": style.clip.height,
        "coverage": outcome.coverage,
        "covered_pixels": mask.coverage_count(),
        "edges": outcome.edges,
        "closed_path": outcome.closed_path,
        "output": output.map(|p| p.display().to_string()),
        "renderer": stats.renderer,
        "pool": pool.stats(),
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

/// Render a batch and stream results as JSONL
fn process_batch(config: RasterConfig, input: Option<PathBuf>, output_dir: Option<PathBuf>) -> Result<()> {
    let json = read_input(input)?;
    let spec = match JobSpec::from_json(&json) {
        Ok(spec) => spec,
        Err(e) => {
            error!("Failed to parse job specification: {}", e);
            return Err(e.into());
        }
    };

    if let Some(dir) = &output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    info!("Processing {} jobs", spec.jobs.len());
    let pool = ContextPool::new(config)?;
    let results = batch::render_batch(&pool, &spec, output_dir.as_deref());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for result in &results {
        writeln!(out, "{}", batch::serialize_job_result(result)?)?;
    }
    out.flush()?;

    info!("Finished processing all jobs");
    Ok(())
}

/// Validate job specification
fn validate_spec(input: Option<PathBuf>) -> Result<()> {
    let json = read_input(input)?;
    match JobSpec::from_json(&json) {
        Ok(spec) => {
            println!("✓ Valid job specification");
            println!("  Version: {}", spec.version);
            println!("  Jobs: {}", spec.jobs.len());
            Ok(())
        }
        Err(e) => {
            println!("✗ Invalid job specification: {}", e);
            Err(e.into())
        }
    }
}
