// this_file: src/lib.rs
//! Covrast - memory and coverage core of an anti-aliased path rasterizer
//!
//! This library provides functionality for:
//! - Off-heap buffers with accounted, bounded native memory
//! - Bucketed array caches and reusable scratch handles
//! - Pooled rendering contexts with dirty tracking and disposal
//! - Alpha coverage masks with a dense and a block-flag path
//! - Batch rendering via JSON job specifications

pub mod alpha_consumer;
pub mod array_cache;
pub mod array_ref;
pub mod batch;
pub mod config;
pub mod context;
pub mod dasher;
pub mod error;
pub mod logging;
pub mod memory_tracker;
pub mod offheap;
pub mod path;
pub mod pool;
pub mod renderer;
pub mod simplifier;
pub mod stroker;

// Re-export commonly used types
pub use alpha_consumer::{AlphaConsumer, MaskAlphaConsumer};
pub use array_cache::{ArrayCache, ArrayCaches, CacheKind};
pub use array_ref::ArrayRef;
pub use batch::{JobResult, JobSpec, RenderJob};
pub use config::{PoolMode, RasterConfig};
pub use context::{RenderOutcome, RenderStyle, RendererContext, StrokeStyle};
pub use error::{Error, Result};
pub use memory_tracker::{MemorySnapshot, MemoryTracker};
pub use offheap::{GlobalBuffer, OffHeapBuffer, OffHeapRegion, OwnershipMode};
pub use path::{Path, PathConsumer};
pub use pool::{ContextPool, PoolStats, PooledContext};
pub use renderer::{FillRule, PixelBounds};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
