// this_file: src/stroker.rs
//! Widens polylines into fillable outlines.
//!
//! Each subpath is buffered until it ends, then emitted as one quad per
//! segment plus a bevel triangle at every corner. Caps are butt caps. All
//! polygons are emitted with the same orientation, so the result must be
//! filled with the non-zero rule.

use crate::array_cache::ArrayCaches;
use crate::array_ref::ArrayRef;
use crate::error::{Error, Result};
use crate::path::{PathConsumer, PathStage};

/// Axis-aligned rectangle in user space, `(x0, y0, x1, y1)`
pub type ClipRect = (f32, f32, f32, f32);

#[derive(Debug)]
pub struct Stroker {
    /// x, y pairs of the buffered subpath
    points: ArrayRef<f32>,
    used: usize,
    half_width: f32,
    clip: Option<ClipRect>,
    culled: u64,
    emitted: u64,
}

impl Stroker {
    pub fn new(caches: &ArrayCaches, initial_size: usize) -> Self {
        Self {
            points: ArrayRef::new(caches.dirty_float.clone(), initial_size),
            used: 0,
            half_width: 0.5,
            clip: None,
            culled: 0,
            emitted: 0,
        }
    }

    /// Set the line width for the next pass. Polygons entirely outside
    /// `clip` are skipped.
    pub fn init(&mut self, width: f32, clip: Option<ClipRect>) -> Result<()> {
        if !width.is_finite() || width <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "stroke width must be positive, got {}",
                width
            )));
        }
        self.half_width = width / 2.0;
        self.clip = clip;
        Ok(())
    }

    /// Buffered points of the current subpath
    pub fn pending_points(&self) -> usize {
        self.used / 2
    }

    /// Polygons skipped by clip culling
    pub fn culled(&self) -> u64 {
        self.culled
    }

    /// Polygons emitted downstream
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn push(&mut self, x: f32, y: f32) -> Result<()> {
        self.points.widen_array(self.used, self.used + 2)?;
        let points = self.points.array_mut();
        points[self.used] = x;
        points[self.used + 1] = y;
        self.used += 2;
        Ok(())
    }

    fn last(&self) -> Option<(f32, f32)> {
        (self.used >= 2).then(|| {
            let points = self.points.array();
            (points[self.used - 2], points[self.used - 1])
        })
    }

    fn point(&self, i: usize) -> (f32, f32) {
        let points = self.points.array();
        (points[2 * i], points[2 * i + 1])
    }

    /// Segment `i` of a subpath with `n` points, wrapping to the start
    fn segment(&self, i: usize, n: usize) -> ((f32, f32), (f32, f32)) {
        (self.point(i), self.point((i + 1) % n))
    }

    /// Emit the buffered subpath. The buffer is cleared only once every
    /// polygon went out.
    fn flush(&mut self, out: &mut dyn PathConsumer, closed: bool) -> Result<()> {
        let n = self.used / 2;
        if n >= 2 {
            let mut segments = n - 1;
            if closed && self.point(n - 1) != self.point(0) {
                segments += 1;
            }
            for i in 0..segments {
                let (a, b) = self.segment(i, n);
                let (nx, ny) = self.offset(a, b);
                let quad = [
                    (a.0 + nx, a.1 + ny),
                    (b.0 + nx, b.1 + ny),
                    (b.0 - nx, b.1 - ny),
                    (a.0 - nx, a.1 - ny),
                ];
                self.emit_polygon(out, &quad)?;
            }
            let joins = if closed { segments } else { segments - 1 };
            for i in 0..joins {
                let (a, b) = self.segment(i, n);
                let (_, c) = self.segment((i + 1) % segments, n);
                if let Some(triangle) = self.bevel(a, b, c) {
                    self.emit_polygon(out, &triangle)?;
                }
            }
        }
        self.used = 0;
        Ok(())
    }

    /// Half-width normal of segment `a -> b`
    fn offset(&self, a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let len = dx.hypot(dy);
        (-dy / len * self.half_width, dx / len * self.half_width)
    }

    /// Triangle filling the outer corner at `b`
    fn bevel(&self, a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> Option<[(f32, f32); 3]> {
        let cross = (b.0 - a.0) * (c.1 - b.1) - (b.1 - a.1) * (c.0 - b.0);
        if cross == 0.0 {
            return None;
        }
        let side = if cross > 0.0 { -1.0 } else { 1.0 };
        let (n0x, n0y) = self.offset(a, b);
        let (n1x, n1y) = self.offset(b, c);
        Some([
            b,
            (b.0 + side * n0x, b.1 + side * n0y),
            (b.0 + side * n1x, b.1 + side * n1y),
        ])
    }

    fn emit_polygon(&mut self, out: &mut dyn PathConsumer, points: &[(f32, f32)]) -> Result<()> {
        if let Some((cx0, cy0, cx1, cy1)) = self.clip {
            let (mut x0, mut y0, mut x1, mut y1) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
            for &(x, y) in points {
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
            }
            if x1 < cx0 || y1 < cy0 || x0 > cx1 || y0 > cy1 {
                self.culled += 1;
                return Ok(());
            }
        }
        let area: f32 = (0..points.len())
            .map(|i| {
                let (ax, ay) = points[i];
                let (bx, by) = points[(i + 1) % points.len()];
                ax * by - bx * ay
            })
            .sum();
        let mut ordered = points.iter();
        let mut reversed = points.iter().rev();
        let walk: &mut dyn Iterator<Item = &(f32, f32)> = if area < 0.0 {
            &mut reversed
        } else {
            &mut ordered
        };
        if let Some(&(x, y)) = walk.next() {
            out.move_to(x, y)?;
            for &(x, y) in walk {
                out.line_to(x, y)?;
            }
            out.close_path()?;
        }
        self.emitted += 1;
        Ok(())
    }
}

impl PathStage for Stroker {
    fn move_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        self.flush(out, false)?;
        self.push(x, y)
    }

    fn line_to(&mut self, _out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        if self.last() == Some((x, y)) {
            return Ok(());
        }
        self.push(x, y)
    }

    fn close_path(&mut self, out: &mut dyn PathConsumer) -> Result<()> {
        let Some(start) = (self.used >= 2).then(|| self.point(0)) else {
            return Ok(());
        };
        self.flush(out, true)?;
        // drawing continues from the subpath start
        self.push(start.0, start.1)
    }

    fn path_done(&mut self, out: &mut dyn PathConsumer) -> Result<()> {
        self.flush(out, false)?;
        out.path_done()?;
        self.points.put_array(0, 0)
    }

    fn dispose(&mut self) -> Result<()> {
        self.used = 0;
        self.clip = None;
        self.points.put_array(0, 0)
    }
}
