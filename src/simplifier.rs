// this_file: src/simplifier.rs
//! Drops interior points of straight runs before stroking.

use crate::error::Result;
use crate::path::{PathConsumer, PathStage};

/// Relative tolerance of the collinearity test
const COLLINEAR_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Empty,
    Point { x: f32, y: f32 },
    Line { x0: f32, y0: f32, x1: f32, y1: f32 },
}

/// Merges consecutive segments that continue in the same direction
#[derive(Debug)]
pub struct CollinearSimplifier {
    pending: Pending,
    merged: u64,
}

impl Default for CollinearSimplifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CollinearSimplifier {
    pub fn new() -> Self {
        Self {
            pending: Pending::Empty,
            merged: 0,
        }
    }

    /// Points dropped so far
    pub fn merged(&self) -> u64 {
        self.merged
    }

    /// True when no point is held back
    pub fn is_idle(&self) -> bool {
        self.pending == Pending::Empty
    }

    fn flush(&mut self, out: &mut dyn PathConsumer) -> Result<()> {
        if let Pending::Line { x1, y1, .. } = self.pending {
            out.line_to(x1, y1)?;
            self.pending = Pending::Point { x: x1, y: y1 };
        }
        Ok(())
    }
}

fn continues(x0: f32, y0: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> bool {
    let (ax, ay) = (x1 - x0, y1 - y0);
    let (bx, by) = (x2 - x1, y2 - y1);
    let cross = ax * by - ay * bx;
    let dot = ax * bx + ay * by;
    dot > 0.0 && cross.abs() <= COLLINEAR_EPSILON * (ax.hypot(ay) * bx.hypot(by))
}

impl PathStage for CollinearSimplifier {
    fn move_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        self.flush(out)?;
        out.move_to(x, y)?;
        self.pending = Pending::Point { x, y };
        Ok(())
    }

    fn line_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()> {
        match self.pending {
            Pending::Empty => out.line_to(x, y),
            Pending::Point { x: x0, y: y0 } => {
                self.pending = Pending::Line { x0, y0, x1: x, y1: y };
                Ok(())
            }
            Pending::Line { x0, y0, x1, y1 } => {
                if continues(x0, y0, x1, y1, x, y) {
                    self.pending = Pending::Line { x0, y0, x1: x, y1: y };
                    self.merged += 1;
                } else {
                    out.line_to(x1, y1)?;
                    self.pending = Pending::Line { x0: x1, y0: y1, x1: x, y1: y };
                }
                Ok(())
            }
        }
    }

    fn close_path(&mut self, out: &mut dyn PathConsumer) -> Result<()> {
        self.flush(out)?;
        out.close_path()?;
        self.pending = Pending::Empty;
        Ok(())
    }

    fn path_done(&mut self, out: &mut dyn PathConsumer) -> Result<()> {
        self.flush(out)?;
        out.path_done()?;
        self.pending = Pending::Empty;
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.pending = Pending::Empty;
        Ok(())
    }
}
