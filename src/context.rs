// this_file: src/context.rs
//! Per-owner rendering context.
//!
//! A context bundles the array caches, the renderer and the path stages of
//! one owner, allocated once and reused for every pass. A pass marks the
//! context dirty on entry and clean only on success, so [`RendererContext::dispose`]
//! knows when the stages may still hold state from an interrupted pass.

use crate::alpha_consumer::MaskAlphaConsumer;
use crate::array_cache::{ArrayCaches, CacheSetStats};
use crate::config::RasterConfig;
use crate::dasher::Dasher;
use crate::error::{Error, Result};
use crate::memory_tracker::{MemorySnapshot, MemoryTracker};
use crate::path::{Chained, Path, PathConsumer, PathStage};
use crate::renderer::{FillRule, PixelBounds, Renderer, RendererStats};
use crate::simplifier::CollinearSimplifier;
use crate::stroker::{ClipRect, Stroker};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_true() -> bool {
    true
}

fn default_scale() -> f32 {
    1.0
}

/// Stroke parameters in user units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub width: f32,
    /// Alternating on/off lengths; empty for a solid line
    #[serde(default)]
    pub dashes: Vec<f32>,
    #[serde(default)]
    pub dash_phase: f32,
}

impl StrokeStyle {
    pub fn solid(width: f32) -> Self {
        Self {
            width,
            dashes: Vec::new(),
            dash_phase: 0.0,
        }
    }

    pub fn dashed(width: f32, dashes: Vec<f32>, dash_phase: f32) -> Self {
        Self {
            width,
            dashes,
            dash_phase,
        }
    }
}

/// How one path is rendered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStyle {
    /// Device pixels that receive coverage; also the mask bounds
    pub clip: PixelBounds,
    #[serde(default)]
    pub fill_rule: FillRule,
    /// Stroke instead of fill when present
    #[serde(default)]
    pub stroke: Option<StrokeStyle>,
    #[serde(default = "default_true")]
    pub antialias: bool,
    /// Uniform user-to-device scale
    #[serde(default = "default_scale")]
    pub scale: f32,
}

impl RenderStyle {
    pub fn fill(clip: PixelBounds) -> Self {
        Self {
            clip,
            fill_rule: FillRule::NonZero,
            stroke: None,
            antialias: true,
            scale: 1.0,
        }
    }

    pub fn stroke(clip: PixelBounds, stroke: StrokeStyle) -> Self {
        Self {
            stroke: Some(stroke),
            ..Self::fill(clip)
        }
    }

    pub fn with_fill_rule(mut self, fill_rule: FillRule) -> Self {
        self.fill_rule = fill_rule;
        self
    }

    pub fn with_antialias(mut self, antialias: bool) -> Self {
        self.antialias = antialias;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.clip.validate()?;
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "scale must be positive, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Result of one successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderOutcome {
    /// Pixel bounds of the coverage inside the clip
    pub coverage: Option<PixelBounds>,
    pub edges: usize,
    /// Every subpath of the input ended with an explicit close
    pub closed_path: bool,
}

/// Per-context counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub dirty_disposals: u64,
    pub renderer: RendererStats,
    pub caches: CacheSetStats,
}

/// User-to-device scaling in front of the renderer
struct DeviceTransform<'a> {
    scale: f32,
    next: &'a mut dyn PathConsumer,
}

impl PathConsumer for DeviceTransform<'_> {
    fn move_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.next.move_to(x * self.scale, y * self.scale)
    }

    fn line_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.next.line_to(x * self.scale, y * self.scale)
    }

    fn close_path(&mut self) -> Result<()> {
        self.next.close_path()
    }

    fn path_done(&mut self) -> Result<()> {
        self.next.path_done()
    }
}

pub struct RendererContext {
    id: usize,
    config: Arc<RasterConfig>,
    tracker: Arc<MemoryTracker>,
    caches: ArrayCaches,
    dirty: bool,
    stroking: bool,
    do_clip: bool,
    closed_path: bool,
    clip_inv_scale: f32,
    renderer: Renderer,
    simplifier: CollinearSimplifier,
    dasher: Dasher,
    stroker: Stroker,
    passes: u64,
    failed_passes: u64,
    dirty_disposals: u64,
}

impl RendererContext {
    /// Build a context and all of its scratch storage
    pub fn new(id: usize, config: Arc<RasterConfig>, tracker: Arc<MemoryTracker>) -> Result<Self> {
        let caches = ArrayCaches::new(&config);
        let renderer = Renderer::new(&config, &caches, tracker.clone())?;
        let dasher = Dasher::new(&caches, config.initial_array);
        let stroker = Stroker::new(&caches, config.initial_array);
        if config.diagnostics.verbose {
            debug!("Created rendering context {}", id);
        }
        Ok(Self {
            id,
            tracker,
            caches,
            dirty: false,
            stroking: false,
            do_clip: false,
            closed_path: false,
            clip_inv_scale: 1.0,
            renderer,
            simplifier: CollinearSimplifier::new(),
            dasher,
            stroker,
            passes: 0,
            failed_passes: 0,
            dirty_disposals: 0,
            config,
        })
    }

    /// Stand-alone context with its own unlimited tracker
    pub fn standalone(config: RasterConfig) -> Result<Self> {
        config.validate()?;
        let tracker = Arc::new(MemoryTracker::new(config.offheap_limit_bytes));
        Self::new(0, Arc::new(config), tracker)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    /// Set while a pass is running and after a pass failed, until disposed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_stroking(&self) -> bool {
        self.stroking
    }

    pub fn clip_inv_scale(&self) -> f32 {
        self.clip_inv_scale
    }

    /// Mask with this context's block size, not yet sized
    pub fn new_mask(&self) -> Result<MaskAlphaConsumer> {
        MaskAlphaConsumer::new(self.config.block_size_lg)
    }

    pub fn memory(&self) -> MemorySnapshot {
        self.tracker.snapshot()
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            passes: self.passes,
            failed_passes: self.failed_passes,
            dirty_disposals: self.dirty_disposals,
            renderer: self.renderer.stats(),
            caches: self.caches.stats(),
        }
    }

    /// Render `path` into `mask`, which is resized to the style's clip
    pub fn render(&mut self, path: &Path, style: &RenderStyle, mask: &mut MaskAlphaConsumer) -> Result<RenderOutcome> {
        self.dirty = true;
        self.passes += 1;
        match self.run_pass(path, style, mask) {
            Ok(outcome) => {
                self.dirty = false;
                Ok(outcome)
            }
            Err(e) => {
                self.failed_passes += 1;
                debug!("Context {}: pass failed: {}", self.id, e);
                Err(e)
            }
        }
    }

    fn run_pass(&mut self, path: &Path, style: &RenderStyle, mask: &mut MaskAlphaConsumer) -> Result<RenderOutcome> {
        style.validate()?;
        let clip = style.clip;
        mask.set_bounds(clip.x, clip.y, clip.width as usize, clip.height as usize)?;

        self.stroking = style.stroke.is_some();
        self.do_clip = self.config.enable_path_clipping;
        self.clip_inv_scale = 1.0 / style.scale;
        self.closed_path = is_closed(path);

        let fill_rule = if self.stroking {
            FillRule::NonZero
        } else {
            style.fill_rule
        };
        self.renderer.init(clip, fill_rule, style.antialias)?;

        let scale = style.scale;
        let mut device = DeviceTransform {
            scale,
            next: &mut self.renderer,
        };
        match &style.stroke {
            None => path.feed(&mut device)?,
            Some(stroke) => {
                let user_clip = self.do_clip.then(|| user_clip(clip, self.clip_inv_scale));
                self.stroker.init(stroke.width, user_clip)?;
                let mut stroker = Chained::new(&mut self.stroker, &mut device);
                let mut simplifier = Chained::new(&mut self.simplifier, &mut stroker);
                if stroke.dashes.is_empty() {
                    path.feed(&mut simplifier)?;
                } else {
                    self.dasher.init(&stroke.dashes, stroke.dash_phase)?;
                    let mut dasher = Chained::new(&mut self.dasher, &mut simplifier);
                    path.feed(&mut dasher)?;
                }
            }
        }

        let edges = self.renderer.edge_count();
        let coverage = self.renderer.end_rendering();
        if coverage.is_some() {
            self.renderer.produce_alphas(mask)?;
        }
        Ok(RenderOutcome {
            coverage,
            edges,
            closed_path: self.closed_path,
        })
    }

    /// Reset per-pass state. After a failed pass the path stages are
    /// disposed as well, so nothing from that pass reaches the next one.
    pub fn dispose(&mut self) -> Result<()> {
        self.stroking = false;
        self.do_clip = false;
        self.closed_path = false;
        self.clip_inv_scale = 1.0;

        self.renderer.dispose(self.dirty)?;
        if self.dirty {
            warn!("Context {}: cleaning up after an interrupted pass", self.id);
            self.dasher.dispose()?;
            self.stroker.dispose()?;
            self.simplifier.dispose()?;
            self.dirty = false;
            self.dirty_disposals += 1;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RendererContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererContext")
            .field("id", &self.id)
            .field("dirty", &self.dirty)
            .field("renderer", &self.renderer)
            .finish()
    }
}

/// Device clip mapped back to user space
fn user_clip(clip: PixelBounds, inv_scale: f32) -> ClipRect {
    (
        clip.x as f32 * inv_scale,
        clip.y as f32 * inv_scale,
        clip.x1() as f32 * inv_scale,
        clip.y1() as f32 * inv_scale,
    )
}

fn is_closed(path: &Path) -> bool {
    use crate::path::PathCommand;
    let mut open = false;
    for command in path.commands() {
        match command {
            PathCommand::MoveTo(..) if open => return false,
            PathCommand::MoveTo(..) => {}
            PathCommand::LineTo(..) => open = true,
            PathCommand::Close => open = false,
        }
    }
    !open
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RendererContext {
        RendererContext::standalone(RasterConfig::default()).unwrap()
    }

    #[test]
    fn fill_pass_leaves_context_clean() {
        let mut ctx = context();
        let mut mask = ctx.new_mask().unwrap();
        let style = RenderStyle::fill(PixelBounds::new(0, 0, 16, 16));
        let outcome = ctx.render(&Path::rect(2.0, 2.0, 4.0, 4.0), &style, &mut mask).unwrap();
        assert!(!ctx.is_dirty());
        assert_eq!(outcome.coverage, Some(PixelBounds::new(2, 2, 4, 4)));
        assert!(outcome.closed_path);
        assert_eq!(mask.coverage_count(), 16);
        ctx.dispose().unwrap();
        assert_eq!(ctx.stats().dirty_disposals, 0);
    }

    #[test]
    fn invalid_style_marks_dirty_until_disposed() {
        let mut ctx = context();
        let mut mask = ctx.new_mask().unwrap();
        let style = RenderStyle::stroke(PixelBounds::new(0, 0, 8, 8), StrokeStyle::solid(-1.0));
        assert!(ctx.render(&Path::rect(1.0, 1.0, 2.0, 2.0), &style, &mut mask).is_err());
        assert!(ctx.is_dirty());
        ctx.dispose().unwrap();
        assert!(!ctx.is_dirty());
        assert!(!ctx.is_stroking());
        assert_eq!(ctx.stats().dirty_disposals, 1);
    }

    #[test]
    fn interrupted_dashed_stroke_disposes_stages() {
        let mut ctx = RendererContext::standalone(RasterConfig {
            initial_edges: 16,
            offheap_limit_bytes: Some(512),
            ..RasterConfig::default()
        })
        .unwrap();
        let mut mask = ctx.new_mask().unwrap();
        let mut path = Path::new();
        path.move_to(2.0, 2.0);
        for i in 0..20 {
            path.line_to(2.0 + i as f32 * 3.0, if i % 2 == 0 { 60.0 } else { 2.0 });
        }
        let style = RenderStyle::stroke(
            PixelBounds::new(0, 0, 64, 64),
            StrokeStyle::dashed(1.5, vec![5.0, 2.0], 1.0),
        );
        let err = ctx.render(&path, &style, &mut mask).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
        assert!(ctx.dasher.is_active());

        ctx.dispose().unwrap();
        assert!(!ctx.dasher.is_active());
        assert_eq!(ctx.stroker.pending_points(), 0);
        assert_eq!(ctx.stats().dirty_disposals, 1);
    }

    #[test]
    fn scale_maps_user_units_to_pixels() {
        let mut ctx = context();
        let mut mask = ctx.new_mask().unwrap();
        let style = RenderStyle::fill(PixelBounds::new(0, 0, 20, 20)).with_scale(2.0);
        let outcome = ctx.render(&Path::rect(1.0, 1.0, 3.0, 3.0), &style, &mut mask).unwrap();
        assert_eq!(outcome.coverage, Some(PixelBounds::new(2, 2, 6, 6)));
        approx::assert_relative_eq!(ctx.clip_inv_scale(), 0.5);
        ctx.dispose().unwrap();
        assert_eq!(ctx.clip_inv_scale(), 1.0);
    }

    #[test]
    fn stroke_covers_line() {
        let mut ctx = context();
        let mut mask = ctx.new_mask().unwrap();
        let style = RenderStyle::stroke(PixelBounds::new(0, 0, 20, 10), StrokeStyle::solid(2.0));
        let path: Path = "M2 5 L18 5".parse().unwrap();
        let outcome = ctx.render(&path, &style, &mut mask).unwrap();
        assert!(!outcome.closed_path);
        assert_eq!(mask.row(4)[10], 255);
        assert_eq!(mask.row(5)[10], 255);
        assert_eq!(mask.row(2)[10], 0);
        ctx.dispose().unwrap();
    }

    #[test]
    fn closed_path_detection() {
        assert!(is_closed(&"M0 0 L1 0 L1 1 Z M5 5 L6 6 Z".parse().unwrap()));
        assert!(!is_closed(&"M0 0 L1 0 M5 5 L6 6 Z".parse().unwrap()));
        assert!(!is_closed(&"M0 0 L1 0".parse().unwrap()));
    }
}
