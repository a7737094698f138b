// this_file: src/path.rs
//! Flattened paths and the stage traits they flow through.
//!
//! Only straight segments exist here. Paths are parsed from a compact SVG
//! subset (`M`, `L`, `H`, `V`, `Z`, absolute or relative) and fed into a
//! chain of [`PathStage`]s ending in a [`PathConsumer`], usually the
//! renderer.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// One drawing command in user space
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCommand {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    Close,
}

/// Sequence of subpaths made of straight segments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    commands: Vec<PathCommand>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed axis-aligned rectangle
    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        let mut path = Self::new();
        path.move_to(x, y)
            .line_to(x + width, y)
            .line_to(x + width, y + height)
            .line_to(x, y + height)
            .close();
        path
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.commands.push(PathCommand::MoveTo(x, y));
        self
    }

    pub fn line_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.commands.push(PathCommand::LineTo(x, y));
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.commands.push(PathCommand::Close);
        self
    }

    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// `(min_x, min_y, max_x, max_y)` of all points, `None` for an empty path
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let mut points = self.commands.iter().filter_map(|c| match *c {
            PathCommand::MoveTo(x, y) | PathCommand::LineTo(x, y) => Some((x, y)),
            PathCommand::Close => None,
        });
        let (x0, y0) = points.next()?;
        Some(points.fold((x0, y0, x0, y0), |(a, b, c, d), (x, y)| {
            (a.min(x), b.min(y), c.max(x), d.max(y))
        }))
    }

    /// Same path with every point multiplied by `scale`
    pub fn scaled(&self, scale: f32) -> Path {
        let commands = self
            .commands
            .iter()
            .map(|c| match *c {
                PathCommand::MoveTo(x, y) => PathCommand::MoveTo(x * scale, y * scale),
                PathCommand::LineTo(x, y) => PathCommand::LineTo(x * scale, y * scale),
                PathCommand::Close => PathCommand::Close,
            })
            .collect();
        Path { commands }
    }

    /// Replay the path into `out`, finishing with `path_done`
    pub fn feed(&self, out: &mut dyn PathConsumer) -> Result<()> {
        for command in &self.commands {
            match *command {
                PathCommand::MoveTo(x, y) => out.move_to(x, y)?,
                PathCommand::LineTo(x, y) => out.line_to(x, y)?,
                PathCommand::Close => out.close_path()?,
            }
        }
        out.path_done()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match command {
                PathCommand::MoveTo(x, y) => write!(f, "M {} {}", x, y)?,
                PathCommand::LineTo(x, y) => write!(f, "L {} {}", x, y)?,
                PathCommand::Close => f.write_str("Z")?,
            }
        }
        Ok(())
    }
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace() || b == b',') {
            self.pos += 1;
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_separators();
        self.peek().is_none()
    }

    fn command(&mut self) -> Option<u8> {
        self.skip_separators();
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() => {
                self.pos += 1;
                Some(b)
            }
            _ => None,
        }
    }

    fn skip_digits(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<f32> {
        self.skip_separators();
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        self.skip_digits();
        if self.peek() == Some(b'.') {
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            self.skip_digits();
        }
        let text = &self.src[start..self.pos];
        text.parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "expected a number at offset {} of path data",
                    start
                ))
            })
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(src: &str) -> Result<Self> {
        let mut path = Path::new();
        let mut scanner = Scanner { src, pos: 0 };
        let mut current: Option<u8> = None;
        let (mut x, mut y) = (0.0f32, 0.0f32);
        let (mut start_x, mut start_y) = (0.0f32, 0.0f32);

        while !scanner.at_end() {
            let cmd = match scanner.command() {
                Some(cmd) => cmd,
                // bare numbers repeat the previous command
                None => match current {
                    Some(cmd) if !cmd.eq_ignore_ascii_case(&b'z') => cmd,
                    _ => {
                        return Err(Error::InvalidParameter(format!(
                            "expected a command at offset {} of path data",
                            scanner.pos
                        )))
                    }
                },
            };
            let upper = cmd.to_ascii_uppercase();
            if path.is_empty() && upper != b'M' {
                return Err(Error::InvalidParameter(
                    "path data must start with a move".into(),
                ));
            }
            let (ox, oy) = if cmd.is_ascii_lowercase() { (x, y) } else { (0.0, 0.0) };
            match upper {
                b'M' => {
                    x = ox + scanner.number()?;
                    y = oy + scanner.number()?;
                    path.move_to(x, y);
                    start_x = x;
                    start_y = y;
                    // coordinates after a move are line segments
                    current = Some(if cmd == b'm' { b'l' } else { b'L' });
                    continue;
                }
                b'L' => {
                    x = ox + scanner.number()?;
                    y = oy + scanner.number()?;
                    path.line_to(x, y);
                }
                b'H' => {
                    x = ox + scanner.number()?;
                    path.line_to(x, y);
                }
                b'V' => {
                    y = oy + scanner.number()?;
                    path.line_to(x, y);
                }
                b'Z' => {
                    path.close();
                    x = start_x;
                    y = start_y;
                }
                _ => {
                    return Err(Error::InvalidParameter(format!(
                        "unsupported path command '{}'",
                        cmd as char
                    )))
                }
            }
            current = Some(cmd);
        }
        Ok(path)
    }
}

/// Final receiver of path geometry
pub trait PathConsumer {
    fn move_to(&mut self, x: f32, y: f32) -> Result<()>;
    fn line_to(&mut self, x: f32, y: f32) -> Result<()>;
    fn close_path(&mut self) -> Result<()>;
    /// End of the whole path; flush anything pending
    fn path_done(&mut self) -> Result<()>;
}

/// Stateful filter between a path source and a consumer.
///
/// A stage keeps state across calls (pending points, dash phase, buffered
/// polylines). A pass that fails part-way leaves that state behind, and only
/// [`PathStage::dispose`] is guaranteed to clear it.
pub trait PathStage {
    fn move_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()>;
    fn line_to(&mut self, out: &mut dyn PathConsumer, x: f32, y: f32) -> Result<()>;
    fn close_path(&mut self, out: &mut dyn PathConsumer) -> Result<()>;
    fn path_done(&mut self, out: &mut dyn PathConsumer) -> Result<()>;

    /// Drop all per-pass state and give borrowed arrays back to their caches
    fn dispose(&mut self) -> Result<()>;
}

/// A stage bound to its downstream consumer, usable as a consumer itself
pub struct Chained<'a, S: PathStage + ?Sized> {
    stage: &'a mut S,
    next: &'a mut dyn PathConsumer,
}

impl<'a, S: PathStage + ?Sized> Chained<'a, S> {
    pub fn new(stage: &'a mut S, next: &'a mut dyn PathConsumer) -> Self {
        Self { stage, next }
    }
}

impl<S: PathStage + ?Sized> PathConsumer for Chained<'_, S> {
    fn move_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.stage.move_to(&mut *self.next, x, y)
    }

    fn line_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.stage.line_to(&mut *self.next, x, y)
    }

    fn close_path(&mut self) -> Result<()> {
        self.stage.close_path(&mut *self.next)
    }

    fn path_done(&mut self) -> Result<()> {
        self.stage.path_done(&mut *self.next)
    }
}

/// Consumer that records what it receives
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PathRecorder {
    pub path: Path,
    pub done: usize,
}

impl PathConsumer for PathRecorder {
    fn move_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.path.move_to(x, y);
        Ok(())
    }

    fn line_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.path.line_to(x, y);
        Ok(())
    }

    fn close_path(&mut self) -> Result<()> {
        self.path.close();
        Ok(())
    }

    fn path_done(&mut self) -> Result<()> {
        self.done += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_commands() {
        let path: Path = "M 1 2 L 3,4 H 10 V -2.5 Z".parse().unwrap();
        assert_eq!(
            path.commands(),
            &[
                PathCommand::MoveTo(1.0, 2.0),
                PathCommand::LineTo(3.0, 4.0),
                PathCommand::LineTo(10.0, 4.0),
                PathCommand::LineTo(10.0, -2.5),
                PathCommand::Close,
            ]
        );
    }

    #[test]
    fn relative_and_implicit_lines() {
        let path: Path = "m10 10 5 0 0 5 z l 1 1".parse().unwrap();
        assert_eq!(
            path.commands(),
            &[
                PathCommand::MoveTo(10.0, 10.0),
                PathCommand::LineTo(15.0, 10.0),
                PathCommand::LineTo(15.0, 15.0),
                PathCommand::Close,
                PathCommand::LineTo(11.0, 11.0),
            ]
        );
    }

    #[test]
    fn exponents_parse() {
        let path: Path = "M1e1 -2E-1".parse().unwrap();
        assert_eq!(path.commands(), &[PathCommand::MoveTo(10.0, -0.2)]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("L 1 2".parse::<Path>().is_err());
        assert!("M 1".parse::<Path>().is_err());
        assert!("M 1 2 C 3 4".parse::<Path>().is_err());
        assert!("M 1 2 Z 4".parse::<Path>().is_err());
        assert!("M 1 x".parse::<Path>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let path = Path::rect(1.0, 2.0, 3.0, 4.0);
        let again: Path = path.to_string().parse().unwrap();
        assert_eq!(path, again);
    }

    #[test]
    fn bounds_and_scale() {
        let path = Path::rect(1.0, 2.0, 3.0, 4.0).scaled(2.0);
        assert_eq!(path.bounds(), Some((2.0, 4.0, 8.0, 12.0)));
        assert_eq!(Path::new().bounds(), None);
    }

    #[test]
    fn feed_ends_with_path_done() {
        let mut rec = PathRecorder::default();
        Path::rect(0.0, 0.0, 1.0, 1.0).feed(&mut rec).unwrap();
        assert_eq!(rec.done, 1);
        assert_eq!(rec.path.len(), 5);
    }
}
