// this_file: src/dasher.rs
//! Splits subpaths into dashes.
//!
//! The pattern alternates on and off lengths starting with "on". An odd
//! pattern is repeated once so on and off lengths alternate. The pattern
//! restarts at the configured phase on every subpath.
//!
//! A segment spanning more than [`MAX_DASH_CYCLES`] pattern repetitions is
//! drawn undashed.

use crate::array_cache::ArrayCaches;
use crate::array_ref::ArrayRef;
use crate::error::{Error, Result};
use crate::path::{PathConsumer, PathStage};

/// Pattern repetitions per segment above which dashing is skipped
pub const MAX_DASH_CYCLES: f32 = 1_000_000.0;

#[derive(Debug)]
pub struct Dasher {
    pattern: ArrayRef<f32>,
    pattern_len: usize,
    total: f32,
    // position at the start of every subpath
    start_idx: usize,
    start_phase: f32,
    start_on: bool,
    // position along the pattern
    idx: usize,
    phase: f32,
    on: bool,
    pen_down: bool,
    cur_x: f32,
    cur_y: f32,
    sub_x: f32,
    sub_y: f32,
}

impl Dasher {
    pub fn new(caches: &ArrayCaches, initial_size: usize) -> Self {
        Self {
            pattern: ArrayRef::new(caches.dirty_float.clone(), initial_size),
            pattern_len: 0,
            total: 0.0,
            start_idx: 0,
            start_phase: 0.0,
            start_on: true,
            idx: 0,
            phase: 0.0,
            on: true,
            pen_down: false,
            cur_x: 0.0,
            cur_y: 0.0,
            sub_x: 0.0,
            sub_y: 0.0,
        }
    }

    /// Load `dashes` and the starting `phase` for the next pass
    pub fn init(&mut self, dashes: &[f32], phase: f32) -> Result<()> {
        if dashes.is_empty() || dashes.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(Error::InvalidParameter(
                "dash lengths must be finite and non-negative".into(),
            ));
        }
        if !phase.is_finite() {
            return Err(Error::InvalidParameter("dash phase must be finite".into()));
        }
        let len = if dashes.len() % 2 == 1 {
            dashes.len() * 2
        } else {
            dashes.len()
        };
        self.pattern.widen_array(0, len)?;
        let pattern = self.pattern.array_mut();
        for (i, slot) in pattern[..len].iter_mut().enumerate() {
            *slot = dashes[i % dashes.len()];
        }
        let total: f32 = pattern[..len].iter().sum();
        if total <= 0.0 {
            return Err(Error::InvalidParameter(
                "dash pattern must have a positive length".into(),
            ));
        }
        self.pattern_len = len;
        self.total = total;

        let mut phase = phase.rem_euclid(total);
        let mut idx = 0;
        let mut on = true;
        let mut steps = 0;
        while phase >= pattern[idx] {
            phase -= pattern[idx];
            idx = (idx + 1) % len;
            on = !on;
            steps += 1;
            if steps > 2 * len {
                // rounding left a residue no entry absorbs
                phase = 0.0;
                break;
            }
        }
        self.start_idx = idx;
        self.start_phase = phase.max(0.0);
        self.start_on = on;
        self.restart();
        Ok(())
    }

    /// True while dashes are loaded
    pub fn is_active(&self) -> bool {
        self.pattern_len > 0
    }

    fn restart(&mut self) {
        self.idx = self.start_idx;
        self.phase = self.start_phase;
        self.on = self.start_on;
        self.pen_down = false;
    }

    fn dash_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        let (x0, y0) = (self.cur_x, self.cur_y);
        let (dx, dy) = (x - x0, y - y0);
        let len = dx.hypot(dy);
        if len == 0.0 {
            return Ok(());
        }
        if len / self.total > MAX_DASH_CYCLES {
            self.pen_to(out, x0, y0)?;
            out.line_to(x, y)?;
            self.cur_x = x;
            self.cur_y = y;
            return Ok(());
        }
        let mut t = 0.0f32;
        // position when the pattern last wrapped
        let mut wrapped_at = f32::NAN;
        while t < len {
            let left = self.pattern.array()[self.idx] - self.phase;
            if t + left > len {
                // current dash runs past the end of this segment
                if self.on {
                    self.pen_to(out, x0 + dx * t / len, y0 + dy * t / len)?;
                    out.line_to(x, y)?;
                }
                self.phase += len - t;
                break;
            }
            t += left;
            if self.on {
                self.pen_to(out, x0 + dx * (t - left) / len, y0 + dy * (t - left) / len)?;
                out.line_to(x0 + dx * t / len, y0 + dy * t / len)?;
            }
            self.phase = 0.0;
            self.idx = (self.idx + 1) % self.pattern_len;
            self.on = !self.on;
            self.pen_down = false;
            if self.idx == 0 {
                if t == wrapped_at {
                    // a whole cycle is below f32 resolution at `t`
                    self.pen_to(out, x0 + dx * t / len, y0 + dy * t / len)?;
                    out.line_to(x, y)?;
                    break;
                }
                wrapped_at = t;
            }
        }
        self.cur_x = x;
        self.cur_y = y;
        Ok(())
    }

    fn pen_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        if !self.pen_down {
            out.move_to(x, y)?;
            self.pen_down = true;
        }
        Ok(())
    }
}

impl PathStage for Dasher {
    fn move_to(&mut self, _out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        self.restart();
        self.cur_x = x;
        self.cur_y = y;
        self.sub_x = x;
        self.sub_y = y;
        Ok(())
    }

    fn line_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        self.dash_to(out, x, y)
    }

    fn close_path(&mut self, out: &mut dyn PathConsumer) -> Result<()> {
        self.dash_to(out, self.sub_x, self.sub_y)?;
        self.restart();
        Ok(())
    }

    fn path_done(&mut self, out: &mut dyn PathConsumer) -> Result<()> {
        out.path_done()?;
        self.pattern.put_array(0, 0)?;
        self.pattern_len = 0;
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.pattern.put_array(0, 0)?;
        self.pattern_len = 0;
        self.total = 0.0;
        self.start_idx = 0;
        self.start_phase = 0.0;
        self.start_on = true;
        self.restart();
        self.cur_x = 0.0;
        self.cur_y = 0.0;
        self.sub_x = 0.0;
        self.sub_y = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RasterConfig;
    use crate::path::{Chained, Path, PathCommand, PathRecorder};

    fn dasher() -> Dasher {
        Dasher::new(&ArrayCaches::new(&RasterConfig::default()), 16)
    }

    fn dash(dasher: &mut Dasher, path: &str) -> Vec<PathCommand> {
        let path: Path = path.parse().unwrap();
        let mut rec = PathRecorder::default();
        path.feed(&mut Chained::new(dasher, &mut rec)).unwrap();
        rec.path.commands().to_vec()
    }

    #[test]
    fn splits_line_into_dashes() {
        let mut d = dasher();
        d.init(&[2.0, 1.0], 0.0).unwrap();
        assert_eq!(
            dash(&mut d, "M0 0 L7 0"),
            vec![
                PathCommand::MoveTo(0.0, 0.0),
                PathCommand::LineTo(2.0, 0.0),
                PathCommand::MoveTo(3.0, 0.0),
                PathCommand::LineTo(5.0, 0.0),
                PathCommand::MoveTo(6.0, 0.0),
                PathCommand::LineTo(7.0, 0.0),
            ]
        );
    }

    #[test]
    fn dash_continues_across_corner() {
        let mut d = dasher();
        d.init(&[3.0, 1.0], 0.0).unwrap();
        let cmds = dash(&mut d, "M0 0 L2 0 L2 2");
        assert_eq!(
            &cmds[..3],
            &[
                PathCommand::MoveTo(0.0, 0.0),
                PathCommand::LineTo(2.0, 0.0),
                PathCommand::LineTo(2.0, 1.0),
            ]
        );
    }

    #[test]
    fn phase_skips_into_pattern() {
        let mut d = dasher();
        d.init(&[2.0, 2.0], 3.0).unwrap();
        assert_eq!(
            dash(&mut d, "M0 0 L4 0"),
            vec![PathCommand::MoveTo(1.0, 0.0), PathCommand::LineTo(3.0, 0.0)]
        );
    }

    #[test]
    fn odd_pattern_is_repeated() {
        let mut d = dasher();
        d.init(&[1.0], 0.0).unwrap();
        let cmds = dash(&mut d, "M0 0 L4 0");
        assert_eq!(cmds.len(), 4);
    }

    #[test]
    fn each_subpath_restarts_the_pattern() {
        let mut d = dasher();
        d.init(&[2.0, 2.0], 0.0).unwrap();
        let cmds = dash(&mut d, "M0 0 L3 0 M0 5 L1 5");
        assert_eq!(cmds[2], PathCommand::MoveTo(0.0, 5.0));
    }

    #[test]
    fn tiny_pattern_draws_segment_solid() {
        let mut d = dasher();
        d.init(&[1e-9, 1e-9], 0.0).unwrap();
        assert_eq!(
            dash(&mut d, "M2 5 L30 5"),
            vec![PathCommand::MoveTo(2.0, 5.0), PathCommand::LineTo(30.0, 5.0)]
        );
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let mut d = dasher();
        assert!(d.init(&[], 0.0).is_err());
        assert!(d.init(&[0.0, 0.0], 0.0).is_err());
        assert!(d.init(&[1.0, -1.0], 0.0).is_err());
        assert!(d.init(&[1.0, f32::NAN], 0.0).is_err());
        assert!(d.init(&[1.0, 1.0], f32::INFINITY).is_err());
    }

    #[test]
    fn dispose_resets_position() {
        let mut d = dasher();
        d.init(&[2.0, 1.0], 0.0).unwrap();
        let mut rec = PathRecorder::default();
        d.move_to(&mut rec, 0.0, 0.0).unwrap();
        d.line_to(&mut rec, 2.5, 0.0).unwrap();
        d.dispose().unwrap();
        assert!(!d.is_active());
        d.init(&[2.0, 1.0], 0.0).unwrap();
        assert_eq!(dash(&mut d, "M0 0 L2 0").len(), 2);
    }
}
