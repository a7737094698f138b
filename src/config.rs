// this_file: src/config.rs
//! Rasterizer configuration.
//!
//! All tunables live in one [`RasterConfig`] that is resolved once (defaults,
//! then an optional JSON file, then `COVRAST_*` environment variables) and
//! threaded explicitly into the context pool. Nothing reads process-wide
//! settings after that point.

use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest supported subpixel resolution exponent per axis
pub const MAX_SUBPIXEL_LG: u32 = 8;

/// Block size exponent range for block flags
pub const MIN_BLOCK_SIZE_LG: u32 = 2;
pub const MAX_BLOCK_SIZE_LG: u32 = 8;

/// Largest render target edge in pixels. Keeps subpixel coordinates inside
/// the 30 bits left after tagging crossings with their orientation.
pub const MAX_TARGET_DIMENSION: u32 = 1 << 20;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "COVRAST_";

/// How rendering contexts are pooled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    /// One context slot per thread
    ThreadLocal,
    /// Contexts shared through a concurrent queue
    Queue,
}

/// Array cache tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of size classes
    pub buckets: usize,
    /// Element count of the smallest size class
    pub min_array_size: usize,
    /// Each size class is `1 << growth_lg` times the previous one
    pub growth_lg: u32,
    /// Arrays retained per bucket
    pub bucket_capacity: usize,
    /// Above this element count widening grows by 50% instead of doubling
    pub threshold_array_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            buckets: 8,
            min_array_size: 4096,
            growth_lg: 2,
            bucket_capacity: 8,
            threshold_array_size: 16 * 1024 * 1024,
        }
    }
}

/// Context pool tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub mode: PoolMode,
    /// Idle contexts kept by the shared queue before extra ones are dropped
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: PoolMode::ThreadLocal,
            max_idle: 32,
        }
    }
}

/// Observational switches. None of them changes rendered output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Collect cache and pool counters
    pub do_stats: bool,
    /// Verify clean-cache arrays and other internal invariants
    pub do_checks: bool,
    /// Log off-heap allocations and context creation
    pub verbose: bool,
}

/// Complete rasterizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// log2 of horizontal subpixel samples per pixel
    pub subpixel_lg_x: u32,
    /// log2 of vertical subpixel samples per pixel
    pub subpixel_lg_y: u32,
    /// log2 of the pixel block size used by block flags
    pub block_size_lg: u32,
    pub enable_block_flags: bool,
    /// Decide per row whether block flags pay off
    pub block_flags_heuristics: bool,
    /// Rows narrower than this never use block flags
    pub rle_min_width: u32,
    /// Let the stroker drop segments that cannot touch the clip
    pub enable_path_clipping: bool,
    /// Initial edge capacity of the off-heap edge buffer
    pub initial_edges: usize,
    pub initial_pixel_width: usize,
    pub initial_pixel_height: usize,
    /// Initial length of crossing and stage scratch arrays
    pub initial_array: usize,
    /// Byte limit for off-heap memory of one pool; `None` means unlimited
    pub offheap_limit_bytes: Option<usize>,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            subpixel_lg_x: 8,
            subpixel_lg_y: 3,
            block_size_lg: 5,
            enable_block_flags: true,
            block_flags_heuristics: true,
            rle_min_width: 64,
            enable_path_clipping: true,
            initial_edges: 4096,
            initial_pixel_width: 4096,
            initial_pixel_height: 2176,
            initial_array: 256,
            offheap_limit_bytes: None,
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl RasterConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RasterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `COVRAST_*` overrides from an iterator of variables.
    ///
    /// Variables without the prefix are ignored; unknown names with the
    /// prefix are rejected so typos do not go unnoticed.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name.to_ascii_lowercase().as_str() {
                "subpixel_lg_x" => self.subpixel_lg_x = parse_var(name, value)?,
                "subpixel_lg_y" => self.subpixel_lg_y = parse_var(name, value)?,
                "block_size_lg" => self.block_size_lg = parse_var(name, value)?,
                "enable_block_flags" => self.enable_block_flags = parse_var(name, value)?,
                "block_flags_heuristics" => {
                    self.block_flags_heuristics = parse_var(name, value)?
                }
                "rle_min_width" => self.rle_min_width = parse_var(name, value)?,
                "enable_path_clipping" => self.enable_path_clipping = parse_var(name, value)?,
                "initial_edges" => self.initial_edges = parse_var(name, value)?,
                "initial_pixel_width" => self.initial_pixel_width = parse_var(name, value)?,
                "initial_pixel_height" => self.initial_pixel_height = parse_var(name, value)?,
                "initial_array" => self.initial_array = parse_var(name, value)?,
                "offheap_limit_bytes" => {
                    self.offheap_limit_bytes = if value.is_empty() || value == "none" {
                        None
                    } else {
                        Some(parse_var(name, value)?)
                    }
                }
                "cache_buckets" => self.cache.buckets = parse_var(name, value)?,
                "cache_min_array_size" => self.cache.min_array_size = parse_var(name, value)?,
                "cache_growth_lg" => self.cache.growth_lg = parse_var(name, value)?,
                "cache_bucket_capacity" => self.cache.bucket_capacity = parse_var(name, value)?,
                "pool_mode" => {
                    self.pool.mode = match value {
                        "thread_local" => PoolMode::ThreadLocal,
                        "queue" => PoolMode::Queue,
                        other => {
                            return Err(Error::InvalidConfig(format!(
                                "{}POOL_MODE: unknown mode '{}'",
                                ENV_PREFIX, other
                            )))
                        }
                    }
                }
                "pool_max_idle" => self.pool.max_idle = parse_var(name, value)?,
                "do_stats" => self.diagnostics.do_stats = parse_var(name, value)?,
                "do_checks" => self.diagnostics.do_checks = parse_var(name, value)?,
                "verbose" => self.diagnostics.verbose = parse_var(name, value)?,
                _ => {
                    return Err(Error::InvalidConfig(format!(
                        "Unknown environment override {}{}",
                        ENV_PREFIX, name
                    )))
                }
            }
            debug!("Config override {}{} = {}", ENV_PREFIX, name, value);
        }
        self.validate()
    }

    /// Check every field against its documented range
    pub fn validate(&self) -> Result<()> {
        check_range("subpixel_lg_x", self.subpixel_lg_x, 0, MAX_SUBPIXEL_LG)?;
        check_range("subpixel_lg_y", self.subpixel_lg_y, 0, MAX_SUBPIXEL_LG)?;
        check_range(
            "block_size_lg",
            self.block_size_lg,
            MIN_BLOCK_SIZE_LG,
            MAX_BLOCK_SIZE_LG,
        )?;
        check_min("initial_edges", self.initial_edges, 16)?;
        check_min("initial_pixel_width", self.initial_pixel_width, 1)?;
        check_min("initial_pixel_height", self.initial_pixel_height, 1)?;
        check_min("initial_array", self.initial_array, 16)?;
        check_range("cache.buckets", self.cache.buckets, 1, 16)?;
        check_min("cache.min_array_size", self.cache.min_array_size, 16)?;
        check_range("cache.growth_lg", self.cache.growth_lg, 1, 4)?;
        check_range("cache.bucket_capacity", self.cache.bucket_capacity, 1, 64)?;
        check_min("pool.max_idle", self.pool.max_idle, 1)?;

        let top_shift = self.cache.growth_lg as usize * (self.cache.buckets - 1);
        let fits = top_shift < usize::BITS as usize
            && self
                .cache
                .min_array_size
                .checked_mul(1usize << top_shift)
                .map_or(false, |max| max <= i32::MAX as usize);
        if !fits {
            return Err(Error::InvalidConfig(format!(
                "cache size classes overflow: {} buckets from {} growing by 2^{}",
                self.cache.buckets, self.cache.min_array_size, self.cache.growth_lg
            )));
        }
        Ok(())
    }

    /// Coverage value of a fully covered pixel in anti-aliased mode
    pub fn max_aa_coverage(&self) -> u32 {
        1 << (self.subpixel_lg_x + self.subpixel_lg_y)
    }

    /// Pixel width of one flag block
    pub fn block_size(&self) -> usize {
        1 << self.block_size_lg
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::InvalidConfig(format!(
            "{}{}: cannot parse '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

fn check_range<T: PartialOrd + std::fmt::Display>(name: &str, v: T, lo: T, hi: T) -> Result<()> {
    if v < lo || v > hi {
        return Err(Error::InvalidConfig(format!(
            "{} = {} outside [{}, {}]",
            name, v, lo, hi
        )));
    }
    Ok(())
}

fn check_min(name: &str, v: usize, lo: usize) -> Result<()> {
    if v < lo {
        return Err(Error::InvalidConfig(format!(
            "{} = {} below minimum {}",
            name, v, lo
        )));
    }
    Ok(())
}
