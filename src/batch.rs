// this_file: src/batch.rs

//! Batch job processing and JSONL I/O.
//!
//! A batch is a JSON document listing render jobs. Jobs run in parallel on
//! the rayon thread pool, each worker borrowing a context from one shared
//! [`ContextPool`]. Every job produces one result line, including failed
//! ones.

use crate::context::RenderStyle;
use crate::error::{Error, Result};
use crate::logging::Timer;
use crate::memory_tracker::MemorySnapshot;
use crate::path::Path as VectorPath;
use crate::pool::ContextPool;
use crate::renderer::PixelBounds;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on jobs in one batch
pub const MAX_JOBS_PER_SPEC: usize = 100_000;

/// Complete batch specification (top-level JSON input).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSpec {
    /// API version (must be "1.0")
    pub version: String,
    /// Jobs to render
    pub jobs: Vec<RenderJob>,
}

/// Mask file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Pgm,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Pgm => "pgm",
        }
    }
}

/// Single render job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderJob {
    /// Unique job identifier for correlation with results
    pub id: String,
    /// Path data (`M`, `L`, `H`, `V`, `Z`)
    pub path: String,
    pub style: RenderStyle,
    #[serde(default)]
    pub format: OutputFormat,
}

/// Job result (JSONL output line).
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Job ID (matches input)
    pub id: String,
    /// Status: "success" or "error"
    pub status: String,
    /// Rendering output (only present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendering: Option<RenderingOutput>,
    /// Error message (only present on error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timing: TimingInfo,
    /// Off-heap usage of the pool after the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySnapshot>,
}

/// Rendering output data.
#[derive(Debug, Clone, Serialize)]
pub struct RenderingOutput {
    pub width: u32,
    pub height: u32,
    /// Pixel bounds of the coverage, absent for an empty mask
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<PixelBounds>,
    pub covered_pixels: usize,
    /// Mean alpha over the whole mask in `[0, 1]`
    pub density: f64,
    pub edges: usize,
    /// File the mask was written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Timing statistics for a job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingInfo {
    /// Time spent parsing path data (milliseconds)
    pub parse_ms: f64,
    /// Time spent rasterizing (milliseconds)
    pub render_ms: f64,
    /// Total time for job (milliseconds)
    pub total_ms: f64,
}

impl JobResult {
    /// Convenience constructor for error results.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: "error".to_string(),
            rendering: None,
            error: Some(message.into()),
            timing: TimingInfo::default(),
            memory: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

impl JobSpec {
    /// Parse and validate a batch document
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: JobSpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate job specification structure and parameters.
    pub fn validate(&self) -> Result<()> {
        if self.version != "1.0" {
            return Err(Error::InvalidParameter(format!(
                "Unsupported API version '{}', expected '1.0'",
                self.version
            )));
        }
        if self.jobs.is_empty() {
            return Err(Error::InvalidParameter("Jobs array is empty".to_string()));
        }
        if self.jobs.len() > MAX_JOBS_PER_SPEC {
            return Err(Error::InvalidParameter(format!(
                "Too many jobs in spec: {} (max: {})",
                self.jobs.len(),
                MAX_JOBS_PER_SPEC
            )));
        }
        for job in &self.jobs {
            job.validate()?;
        }
        Ok(())
    }
}

impl RenderJob {
    /// Validate individual job parameters.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidParameter("Job ID is empty".to_string()));
        }
        self.style.validate()
    }
}

/// Mask file name for a job id, keeping only safe characters
pub fn output_file_name(id: &str, format: OutputFormat) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.{}", stem, format.extension())
}

/// Render one job with a context borrowed from `pool`
pub fn render_job(pool: &ContextPool, job: &RenderJob, output_dir: Option<&Path>) -> JobResult {
    let mut timer = Timer::new(format!("job {}", job.id));
    match run_job(pool, job, output_dir, &mut timer) {
        Ok(result) => result,
        Err(e) => {
            debug!("Job {} failed: {}", job.id, e);
            let mut result = JobResult::error(job.id.clone(), e.to_string());
            result.timing.total_ms = timer.elapsed_ms();
            result
        }
    }
}

fn run_job(pool: &ContextPool, job: &RenderJob, output_dir: Option<&Path>, timer: &mut Timer) -> Result<JobResult> {
    job.validate()?;
    let path: VectorPath = job.path.parse()?;
    let parse_ms = timer.lap_ms();

    let mut context = pool.acquire()?;
    let mut mask = context.new_mask()?;
    let outcome = context.render(&path, &job.style, &mut mask)?;
    drop(context);
    let render_ms = timer.lap_ms();

    let output = match output_dir {
        Some(dir) => {
            let file: PathBuf = dir.join(output_file_name(&job.id, job.format));
            mask.save(&file)?;
            Some(file.display().to_string())
        }
        None => None,
    };

    let total: u64 = mask.alphas().iter().map(|&a| u64::from(a)).sum();
    let pixels = mask.alphas().len().max(1);
    Ok(JobResult {
        id: job.id.clone(),
        status: "success".to_string(),
        rendering: Some(RenderingOutput {
            width: job.style.clip.width,
            height: job.style.clip.height,
            coverage: outcome.coverage,
            covered_pixels: mask.coverage_count(),
            density: total as f64 / (pixels as f64 * 255.0),
            edges: outcome.edges,
            output,
        }),
        error: None,
        timing: TimingInfo {
            parse_ms,
            render_ms,
            total_ms: timer.elapsed_ms(),
        },
        memory: Some(pool.tracker().snapshot()),
    })
}

/// Render every job in parallel. Results keep the job order.
pub fn render_batch(pool: &ContextPool, spec: &JobSpec, output_dir: Option<&Path>) -> Vec<JobResult> {
    let _timer = Timer::new(format!("batch of {} jobs", spec.jobs.len()));
    let results: Vec<JobResult> = spec
        .jobs
        .par_iter()
        .map(|job| render_job(pool, job, output_dir))
        .collect();
    let failed = results.iter().filter(|r| !r.is_success()).count();
    info!(
        "Rendered {} jobs ({} failed)",
        results.len(),
        failed
    );
    results
}

/// Serialize a result as one JSONL line
pub fn serialize_job_result(result: &JobResult) -> Result<String> {
    Ok(serde_json::to_string(result)?)
}
