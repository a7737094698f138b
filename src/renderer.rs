// this_file: src/renderer.rs
//! Scan converter producing per-row coverage deltas.
//!
//! Line edges are stored as fixed-size records in a confined off-heap
//! buffer and threaded into per-subpixel-row bucket lists. The sweep keeps
//! an active edge list, sorts the crossings of each subpixel row, and
//! accumulates the covered spans into a delta line that an
//! [`AlphaConsumer`] turns into mask bytes once per pixel row.

use crate::alpha_consumer::AlphaConsumer;
use crate::array_cache::{ArrayCaches, CacheSizing};
use crate::array_ref::ArrayRef;
use crate::config::{RasterConfig, MAX_TARGET_DIMENSION};
use crate::error::{Error, Result};
use crate::memory_tracker::MemoryTracker;
use crate::offheap::{OffHeapBuffer, OffHeapRegion};
use crate::path::PathConsumer;
use log::trace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Edge record layout in the off-heap buffer
const OFF_CURX: usize = 0;
const OFF_SLOPE: usize = 4;
const OFF_YMAX: usize = 8;
const OFF_OR: usize = 12;
const OFF_NEXT: usize = 16;
/// Bytes per edge record
pub const SIZEOF_EDGE: usize = 20;

/// Crossing counts below this use insertion sort
const INSERTION_SORT_MAX: usize = 32;

/// How the winding number decides coverage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

/// Integer pixel rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelBounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    pub fn x1(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// Exclusive bottom edge
    pub fn y1(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check that the rectangle is non-empty and inside the supported
    /// coordinate range
    pub fn validate(&self) -> Result<()> {
        let limit = i64::from(MAX_TARGET_DIMENSION);
        if self.is_empty()
            || i64::from(self.x).abs() > limit
            || i64::from(self.y).abs() > limit
            || i64::from(self.width) > limit
            || i64::from(self.height) > limit
        {
            return Err(Error::InvalidParameter(format!(
                "clip {}x{} at ({}, {}) is empty or exceeds {} pixels",
                self.width, self.height, self.x, self.y, MAX_TARGET_DIMENSION
            )));
        }
        Ok(())
    }
}

/// Per-renderer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RendererStats {
    pub passes: u64,
    pub edges: u64,
    pub edge_buffer_growths: u64,
    pub rows: u64,
    pub block_flag_rows: u64,
    pub max_crossings: usize,
}

/// Covered span accumulator for the pixel row being swept
struct RowSpan {
    from: usize,
    to: usize,
}

impl RowSpan {
    fn empty() -> Self {
        Self {
            from: usize::MAX,
            to: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

pub struct Renderer {
    sizing: Arc<CacheSizing>,
    enable_block_flags: bool,
    block_flags_heuristics: bool,
    rle_min_width: usize,
    initial_edge_bytes: usize,
    aa_lg_x: u32,
    aa_lg_y: u32,

    // pass setup
    lg_x: u32,
    lg_y: u32,
    fill_rule: FillRule,
    clip: PixelBounds,
    sp_min_x: i32,
    sp_max_x: i32,
    sp_min_y: i32,
    sp_max_y: i32,

    edges: OffHeapBuffer,
    edge_count: usize,
    edge_min_y: i32,
    edge_max_y: i32,
    edge_min_x: f32,
    edge_max_x: f32,
    buckets: ArrayRef<i32>,
    bucket_lo: usize,
    bucket_hi: usize,

    active: ArrayRef<i32>,
    crossings: ArrayRef<i32>,
    alpha_line: ArrayRef<i32>,
    block_flags: ArrayRef<i32>,

    cur_x: f32,
    cur_y: f32,
    move_x: f32,
    move_y: f32,

    stats: RendererStats,
}

impl Renderer {
    pub fn new(config: &RasterConfig, caches: &ArrayCaches, tracker: Arc<MemoryTracker>) -> Result<Self> {
        let initial_edge_bytes = config.initial_edges * SIZEOF_EDGE;
        let edges = OffHeapBuffer::allocate(initial_edge_bytes, tracker, config.diagnostics.verbose)?;
        let width = config.initial_pixel_width;
        Ok(Self {
            sizing: caches.sizing.clone(),
            enable_block_flags: config.enable_block_flags,
            block_flags_heuristics: config.block_flags_heuristics,
            rle_min_width: config.rle_min_width as usize,
            initial_edge_bytes,
            aa_lg_x: config.subpixel_lg_x,
            aa_lg_y: config.subpixel_lg_y,
            lg_x: config.subpixel_lg_x,
            lg_y: config.subpixel_lg_y,
            fill_rule: FillRule::NonZero,
            clip: PixelBounds::default(),
            sp_min_x: 0,
            sp_max_x: 0,
            sp_min_y: 0,
            sp_max_y: 0,
            edges,
            edge_count: 0,
            edge_min_y: i32::MAX,
            edge_max_y: i32::MIN,
            edge_min_x: f32::INFINITY,
            edge_max_x: f32::NEG_INFINITY,
            buckets: ArrayRef::new(
                caches.clean_int.clone(),
                (config.initial_pixel_height << config.subpixel_lg_y) + 1,
            ),
            bucket_lo: usize::MAX,
            bucket_hi: 0,
            active: ArrayRef::new(caches.dirty_int.clone(), config.initial_array),
            crossings: ArrayRef::new(caches.dirty_int.clone(), config.initial_array),
            alpha_line: ArrayRef::new(caches.clean_int.clone(), width + 2),
            block_flags: ArrayRef::new(
                caches.clean_int.clone(),
                ((width + 2) >> config.block_size_lg) + 2,
            ),
            cur_x: 0.0,
            cur_y: 0.0,
            move_x: 0.0,
            move_y: 0.0,
            stats: RendererStats::default(),
        })
    }

    /// Prepare a pass over `clip`
    pub fn init(&mut self, clip: PixelBounds, fill_rule: FillRule, antialias: bool) -> Result<()> {
        clip.validate()?;
        let (lg_x, lg_y) = if antialias {
            (self.aa_lg_x, self.aa_lg_y)
        } else {
            (0, 0)
        };
        self.lg_x = lg_x;
        self.lg_y = lg_y;
        self.fill_rule = fill_rule;
        self.clip = clip;
        self.sp_min_x = to_subpixel(i64::from(clip.x), lg_x)?;
        self.sp_max_x = to_subpixel(clip.x1(), lg_x)?;
        self.sp_min_y = to_subpixel(i64::from(clip.y), lg_y)?;
        self.sp_max_y = to_subpixel(clip.y1(), lg_y)?;

        self.edges.set_used(0);
        self.edge_count = 0;
        self.edge_min_y = i32::MAX;
        self.edge_max_y = i32::MIN;
        self.edge_min_x = f32::INFINITY;
        self.edge_max_x = f32::NEG_INFINITY;
        if self.bucket_lo < self.bucket_hi {
            // heads left by a pass that was not disposed
            self.buckets.array_mut()[self.bucket_lo..self.bucket_hi].fill(0);
        }
        self.bucket_lo = usize::MAX;
        self.bucket_hi = 0;

        let rows = ((clip.height as usize) << lg_y) + 1;
        self.buckets.widen_array(0, rows)?;
        self.stats.passes += 1;
        trace!(
            "Renderer init: clip {:?}, subpixels {}x{}, {:?}",
            clip,
            1 << lg_x,
            1 << lg_y,
            fill_rule
        );
        Ok(())
    }

    /// Coverage of a fully covered pixel in the current pass
    pub fn max_coverage(&self) -> u32 {
        1 << (self.lg_x + self.lg_y)
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Bytes of the off-heap edge buffer
    pub fn edge_buffer_len(&self) -> usize {
        self.edges.length()
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    fn add_line(&mut self, mut x1: f32, mut y1: f32, mut x2: f32, mut y2: f32) -> Result<()> {
        let mut or = 1;
        if y2 < y1 {
            std::mem::swap(&mut x1, &mut x2);
            std::mem::swap(&mut y1, &mut y2);
            or = 0;
        }
        // rows whose sample centre y + 0.5 lies in [y1, y2)
        let first = ((y1 - 0.5).ceil() as i32).max(self.sp_min_y);
        let last = ((y2 - 0.5).ceil() as i32).min(self.sp_max_y);
        if first >= last {
            return Ok(());
        }

        let slope = (x2 - x1) / (y2 - y1);
        let cur_x = x1 + (first as f32 + 0.5 - y1) * slope;

        let offset = self.edge_count * SIZEOF_EDGE;
        let needed = offset + SIZEOF_EDGE;
        if needed > self.edges.length() {
            let size = self.sizing.new_large_size(self.edges.length(), needed)?;
            self.edges.resize(size)?;
            self.stats.edge_buffer_growths += 1;
        }

        let bucket = (first - self.sp_min_y) as usize;
        let head = self.buckets.array()[bucket];
        self.edges.put_float(offset + OFF_CURX, cur_x);
        self.edges.put_float(offset + OFF_SLOPE, slope);
        self.edges.put_int(offset + OFF_YMAX, last);
        self.edges.put_int(offset + OFF_OR, or);
        self.edges.put_int(offset + OFF_NEXT, head);
        self.edges.set_used(needed);
        self.buckets.array_mut()[bucket] = self.edge_count as i32 + 1;
        self.edge_count += 1;
        self.stats.edges += 1;

        self.bucket_lo = self.bucket_lo.min(bucket);
        self.bucket_hi = self.bucket_hi.max(bucket + 1);
        self.edge_min_y = self.edge_min_y.min(first);
        self.edge_max_y = self.edge_max_y.max(last);
        self.edge_min_x = self.edge_min_x.min(x1.min(x2));
        self.edge_max_x = self.edge_max_x.max(x1.max(x2));
        Ok(())
    }

    fn to_subpixels(&self, x: f32, y: f32) -> Result<(f32, f32)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "non-finite path coordinate ({}, {})",
                x, y
            )));
        }
        Ok((x * (1u32 << self.lg_x) as f32, y * (1u32 << self.lg_y) as f32))
    }

    /// Pixel bounds of the coverage, clipped. `None` when nothing is covered.
    pub fn end_rendering(&mut self) -> Option<PixelBounds> {
        if self.edge_min_y >= self.edge_max_y {
            return None;
        }
        let sp_x0 = ((self.edge_min_x - 0.5).ceil() as i32).max(self.sp_min_x);
        let sp_x1 = ((self.edge_max_x - 0.5).ceil() as i32).min(self.sp_max_x);
        let mask_x = (1 << self.lg_x) - 1;
        let mask_y = (1 << self.lg_y) - 1;
        let x0 = sp_x0 >> self.lg_x;
        let x1 = (sp_x1 + mask_x) >> self.lg_x;
        let y0 = self.edge_min_y >> self.lg_y;
        let y1 = (self.edge_max_y + mask_y) >> self.lg_y;
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(PixelBounds::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// Sweep the edges and hand every touched pixel row to `consumer`.
    ///
    /// The consumer must cover exactly the pass clip. Rows without edges are
    /// left as the consumer has them.
    pub fn produce_alphas(&mut self, consumer: &mut dyn AlphaConsumer) -> Result<()> {
        let clip = self.clip;
        if consumer.origin_x() != clip.x
            || consumer.origin_y() != clip.y
            || consumer.width() != clip.width as usize
            || consumer.height() != clip.height as usize
        {
            return Err(Error::Precondition(format!(
                "consumer bounds ({}, {}) {}x{} differ from the clip {:?}",
                consumer.origin_x(),
                consumer.origin_y(),
                consumer.width(),
                consumer.height(),
                clip
            )));
        }
        consumer.set_max_alpha(self.max_coverage())?;
        if self.edge_min_y >= self.edge_max_y {
            return Ok(());
        }

        let width = clip.width as usize;
        let blk_lg = consumer.block_size_lg();
        let flags_allowed = self.enable_block_flags
            && consumer.supports_block_flags()
            && width >= self.rle_min_width;
        self.alpha_line.widen_array(0, width + 2)?;
        if flags_allowed {
            self.block_flags.widen_array(0, ((width + 2) >> blk_lg) + 2)?;
        }

        let lg_x = self.lg_x;
        let lg_y = self.lg_y;
        let mask_y = (1 << lg_y) - 1;
        let mut num_active = 0usize;
        let mut span = RowSpan::empty();
        let mut use_flags = false;

        for y in self.edge_min_y..self.edge_max_y {
            // drop finished edges
            let mut kept = 0;
            for i in 0..num_active {
                let edge = self.active.array()[i];
                if self.edges.get_int(edge as usize * SIZEOF_EDGE + OFF_YMAX) > y {
                    self.active.array_mut()[kept] = edge;
                    kept += 1;
                }
            }
            num_active = kept;

            // start edges whose first row is y
            let mut next = self.buckets.array()[(y - self.sp_min_y) as usize];
            while next != 0 {
                let edge = next - 1;
                self.active.widen_array(num_active, num_active + 1)?;
                self.active.array_mut()[num_active] = edge;
                num_active += 1;
                next = self.edges.get_int(edge as usize * SIZEOF_EDGE + OFF_NEXT);
            }

            if y == self.edge_min_y || y & mask_y == 0 {
                use_flags = flags_allowed
                    && (!self.block_flags_heuristics
                        || width / num_active.max(1) > (1usize << blk_lg));
            }

            if num_active > 0 {
                self.crossings.widen_array(0, num_active)?;
                self.stats.max_crossings = self.stats.max_crossings.max(num_active);
                for i in 0..num_active {
                    let off = self.active.array()[i] as usize * SIZEOF_EDGE;
                    let cur_x = self.edges.get_float(off + OFF_CURX);
                    let or = self.edges.get_int(off + OFF_OR);
                    let cross = ((cur_x - 0.5).ceil() as i32).clamp(self.sp_min_x, self.sp_max_x);
                    self.crossings.array_mut()[i] = ((cross - self.sp_min_x) << 1) | or;
                    let slope = self.edges.get_float(off + OFF_SLOPE);
                    self.edges.put_float(off + OFF_CURX, cur_x + slope);
                }
                let crossings = &mut self.crossings.array_mut()[..num_active];
                if num_active < INSERTION_SORT_MAX {
                    insertion_sort(crossings);
                } else {
                    crossings.sort_unstable();
                }

                let crossings = &self.crossings.array()[..num_active];
                let alpha = self.alpha_line.array_mut();
                let mut flags = if use_flags {
                    Some(self.block_flags.array_mut())
                } else {
                    None
                };
                let mut sum = 0i32;
                let mut start = 0i32;
                for &crossing in crossings {
                    let x = crossing >> 1;
                    let was_inside = sum != 0;
                    match self.fill_rule {
                        FillRule::NonZero => sum += if crossing & 1 == 1 { 1 } else { -1 },
                        FillRule::EvenOdd => sum ^= 1,
                    }
                    let inside = sum != 0;
                    if !was_inside && inside {
                        start = x;
                    } else if was_inside && !inside && x > start {
                        add_span(alpha, flags.as_deref_mut(), &mut span, start, x, lg_x, blk_lg);
                    }
                }
            }

            if y & mask_y == mask_y || y + 1 == self.edge_max_y {
                let pix_y = y >> lg_y;
                self.emit_row(consumer, pix_y, &span, use_flags);
                span = RowSpan::empty();
            }
        }
        Ok(())
    }

    fn emit_row(&mut self, consumer: &mut dyn AlphaConsumer, pix_y: i32, span: &RowSpan, use_flags: bool) {
        self.stats.rows += 1;
        if span.is_empty() {
            consumer.clear_alphas(pix_y);
            return;
        }
        let from = self.clip.x + span.from as i32;
        let to = self.clip.x + span.to as i32;
        if use_flags {
            self.stats.block_flag_rows += 1;
            consumer.set_and_clear_relative_alphas_with_flags(
                self.block_flags.array_mut(),
                self.alpha_line.array_mut(),
                pix_y,
                from,
                to,
            );
        } else {
            consumer.set_and_clear_relative_alphas(self.alpha_line.array_mut(), pix_y, from, to);
        }
    }

    /// Return scratch arrays and reset the pass state. With `full_clean`
    /// the delta line and block flags are zeroed entirely, for passes that
    /// stopped before the consumer cleared them.
    pub fn dispose(&mut self, full_clean: bool) -> Result<()> {
        if self.bucket_lo < self.bucket_hi {
            self.buckets.put_array(self.bucket_lo, self.bucket_hi)?;
        } else {
            self.buckets.put_array(0, 0)?;
        }
        if full_clean {
            self.alpha_line.put_array_clean()?;
            self.block_flags.put_array_clean()?;
        } else {
            self.alpha_line.put_array(0, 0)?;
            self.block_flags.put_array(0, 0)?;
        }
        self.active.put_array(0, 0)?;
        self.crossings.put_array(0, 0)?;

        self.edges.set_used(0);
        if self.edges.length() != self.initial_edge_bytes {
            self.edges.resize(self.initial_edge_bytes)?;
        }
        self.edge_count = 0;
        self.edge_min_y = i32::MAX;
        self.edge_max_y = i32::MIN;
        self.edge_min_x = f32::INFINITY;
        self.edge_max_x = f32::NEG_INFINITY;
        self.bucket_lo = usize::MAX;
        self.bucket_hi = 0;
        Ok(())
    }
}

/// Device pixel coordinates in, implicit close on every new subpath
impl PathConsumer for Renderer {
    fn move_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.close_path()?;
        let (sx, sy) = self.to_subpixels(x, y)?;
        self.cur_x = sx;
        self.cur_y = sy;
        self.move_x = sx;
        self.move_y = sy;
        Ok(())
    }

    fn line_to(&mut self, x: f32, y: f32) -> Result<()> {
        let (sx, sy) = self.to_subpixels(x, y)?;
        self.add_line(self.cur_x, self.cur_y, sx, sy)?;
        self.cur_x = sx;
        self.cur_y = sy;
        Ok(())
    }

    fn close_path(&mut self) -> Result<()> {
        if self.cur_x != self.move_x || self.cur_y != self.move_y {
            self.add_line(self.cur_x, self.cur_y, self.move_x, self.move_y)?;
            self.cur_x = self.move_x;
            self.cur_y = self.move_y;
        }
        Ok(())
    }

    fn path_done(&mut self) -> Result<()> {
        self.close_path()
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("clip", &self.clip)
            .field("subpixel_lg", &(self.lg_x, self.lg_y))
            .field("edges", &self.edge_count)
            .field("edge_buffer", &self.edges.length())
            .finish()
    }
}

fn to_subpixel(v: i64, lg: u32) -> Result<i32> {
    i32::try_from(v << lg)
        .map_err(|_| Error::InvalidParameter(format!("coordinate {} overflows subpixel range", v)))
}

fn insertion_sort(values: &mut [i32]) {
    for i in 1..values.len() {
        let v = values[i];
        let mut j = i;
        while j > 0 && values[j - 1] > v {
            values[j] = values[j - 1];
            j -= 1;
        }
        values[j] = v;
    }
}

/// Add the subpixel span `[x0, x1)` (relative to the clip) to the delta line
fn add_span(
    alpha: &mut [i32],
    flags: Option<&mut [i32]>,
    span: &mut RowSpan,
    x0: i32,
    x1: i32,
    lg_x: u32,
    blk_lg: u32,
) {
    let mask_x = (1 << lg_x) - 1;
    let full = 1 << lg_x;
    let p0 = (x0 >> lg_x) as usize;
    let p1 = (x1 >> lg_x) as usize;
    if p0 == p1 {
        let cov = x1 - x0;
        alpha[p0] += cov;
        alpha[p0 + 1] -= cov;
    } else {
        let f0 = x0 & mask_x;
        let f1 = x1 & mask_x;
        alpha[p0] += full - f0;
        alpha[p0 + 1] += f0;
        alpha[p1] -= full - f1;
        alpha[p1 + 1] -= f1;
    }
    if let Some(flags) = flags {
        flags[p0 >> blk_lg] = 1;
        flags[(p0 + 1) >> blk_lg] = 1;
        flags[p1 >> blk_lg] = 1;
        flags[(p1 + 1) >> blk_lg] = 1;
    }
    span.from = span.from.min(p0);
    span.to = span.to.max(p1 + 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpha_consumer::MaskAlphaConsumer;
    use crate::path::Path;

    fn setup(config: &RasterConfig) -> Renderer {
        let caches = ArrayCaches::new(config);
        Renderer::new(config, &caches, Arc::new(MemoryTracker::unlimited())).unwrap()
    }

    fn render(renderer: &mut Renderer, path: &Path, clip: PixelBounds, rule: FillRule, aa: bool) -> MaskAlphaConsumer {
        renderer.init(clip, rule, aa).unwrap();
        path.feed(renderer).unwrap();
        let mut mask =
            MaskAlphaConsumer::with_bounds(5, clip.x, clip.y, clip.width as usize, clip.height as usize)
                .unwrap();
        if renderer.end_rendering().is_some() {
            renderer.produce_alphas(&mut mask).unwrap();
        }
        renderer.dispose(false).unwrap();
        mask
    }

    #[test]
    fn pixel_aligned_square_is_opaque() {
        let mut renderer = setup(&RasterConfig::default());
        let clip = PixelBounds::new(0, 0, 16, 16);
        let mask = render(&mut renderer, &Path::rect(4.0, 4.0, 8.0, 8.0), clip, FillRule::NonZero, true);
        for y in 0..16 {
            for x in 0..16 {
                let inside = (4..12).contains(&x) && (4..12).contains(&y);
                assert_eq!(mask.row(y)[x], if inside { 255 } else { 0 }, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn half_pixel_edge_gives_half_coverage() {
        let mut renderer = setup(&RasterConfig::default());
        let clip = PixelBounds::new(0, 0, 8, 4);
        let mask = render(&mut renderer, &Path::rect(2.5, 0.0, 3.0, 4.0), clip, FillRule::NonZero, true);
        assert_eq!(mask.row(1)[2], 128);
        assert_eq!(mask.row(1)[3], 255);
        assert_eq!(mask.row(1)[5], 128);
        assert_eq!(mask.row(1)[6], 0);
    }

    #[test]
    fn non_antialiased_is_binary() {
        let mut renderer = setup(&RasterConfig::default());
        let clip = PixelBounds::new(0, 0, 8, 8);
        let mask = render(&mut renderer, &Path::rect(1.3, 1.3, 4.4, 4.4), clip, FillRule::NonZero, false);
        assert!(mask.alphas().iter().all(|&a| a == 0 || a == 255));
        assert_eq!(mask.row(3)[3], 255);
    }

    #[test]
    fn even_odd_punches_holes() {
        let mut renderer = setup(&RasterConfig::default());
        let clip = PixelBounds::new(0, 0, 12, 12);
        let path: Path = "M0 0 L12 0 L12 12 L0 12 Z M3 3 L9 3 L9 9 L3 9 Z".parse().unwrap();
        let even_odd = render(&mut renderer, &path, clip, FillRule::EvenOdd, true);
        assert_eq!(even_odd.row(6)[6], 0);
        assert_eq!(even_odd.row(1)[1], 255);
        let non_zero = render(&mut renderer, &path, clip, FillRule::NonZero, true);
        assert_eq!(non_zero.row(6)[6], 255);
    }

    #[test]
    fn edges_outside_clip_are_clamped() {
        let mut renderer = setup(&RasterConfig::default());
        let clip = PixelBounds::new(10, 10, 8, 8);
        let mask = render(&mut renderer, &Path::rect(0.0, 0.0, 14.0, 30.0), clip, FillRule::NonZero, true);
        for y in 0..8 {
            assert_eq!(&mask.row(y)[..4], &[255, 255, 255, 255]);
            assert_eq!(&mask.row(y)[4..], &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn edge_buffer_grows_and_shrinks_back() {
        let config = RasterConfig {
            initial_edges: 16,
            ..RasterConfig::default()
        };
        let mut renderer = setup(&config);
        let initial = renderer.edge_buffer_len();
        let mut path = Path::new();
        for i in 0..40 {
            path.move_to(i as f32, 0.0).line_to(i as f32 + 0.5, 20.0).line_to(i as f32, 20.0).close();
        }
        renderer.init(PixelBounds::new(0, 0, 64, 32), FillRule::NonZero, true).unwrap();
        path.feed(&mut renderer).unwrap();
        assert!(renderer.edge_count() > 16);
        assert!(renderer.edge_buffer_len() > initial);
        renderer.dispose(true).unwrap();
        assert_eq!(renderer.edge_buffer_len(), initial);
        assert_eq!(renderer.edge_count(), 0);
    }

    #[test]
    fn end_rendering_reports_bbox() {
        let mut renderer = setup(&RasterConfig::default());
        renderer.init(PixelBounds::new(0, 0, 32, 32), FillRule::NonZero, true).unwrap();
        Path::rect(2.0, 3.0, 5.0, 6.0).feed(&mut renderer).unwrap();
        assert_eq!(renderer.end_rendering(), Some(PixelBounds::new(2, 3, 5, 6)));
        renderer.dispose(true).unwrap();

        renderer.init(PixelBounds::new(0, 0, 32, 32), FillRule::NonZero, true).unwrap();
        Path::rect(40.0, 3.0, 5.0, 6.0).feed(&mut renderer).unwrap();
        assert_eq!(renderer.end_rendering(), None);
        renderer.dispose(false).unwrap();
    }

    #[test]
    fn mismatched_consumer_is_rejected() {
        let mut renderer = setup(&RasterConfig::default());
        renderer.init(PixelBounds::new(0, 0, 8, 8), FillRule::NonZero, true).unwrap();
        Path::rect(1.0, 1.0, 2.0, 2.0).feed(&mut renderer).unwrap();
        let mut mask = MaskAlphaConsumer::with_bounds(5, 0, 0, 4, 4).unwrap();
        assert!(matches!(
            renderer.produce_alphas(&mut mask),
            Err(Error::Precondition(_))
        ));
        renderer.dispose(true).unwrap();
    }

    #[test]
    fn insertion_sort_sorts() {
        let mut values = vec![5, -1, 3, 3, 0, 9];
        insertion_sort(&mut values);
        assert_eq!(values, vec![-1, 0, 3, 3, 5, 9]);
    }
}
