// this_file: src/logging.rs
//! Log output for the `covrast` binary and pass timing.
//!
//! The library only talks to the `log` facade; the binary installs
//! env_logger once through [`init_logging`].

use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;
use std::time::Instant;

/// Map a textual level onto a filter. Unknown names fall back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LevelFilter::Info
        }
    }
}

/// Crate-local targets lose their `covrast::` prefix
fn short_target(target: &str) -> &str {
    target.strip_prefix("covrast::").unwrap_or(target)
}

/// Install the stderr logger. `RUST_LOG` directives refine `level`.
///
/// Records from worker threads carry the thread name so interleaved batch
/// output can be followed per job. Later calls are ignored.
pub fn init_logging(level: &str, quiet: bool) {
    let level_filter = if quiet {
        LevelFilter::Error
    } else {
        parse_level(level)
    };

    let mut builder = Builder::new();
    builder.filter_level(level_filter);
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        builder.parse_filters(&rust_log);
    }

    builder.format(|buf, record| {
        let style = buf.default_level_style(record.level());
        let thread = std::thread::current();
        match thread.name().filter(|name| *name != "main") {
            Some(name) => writeln!(
                buf,
                "{} {style}{:5}{style:#} {}@{}: {}",
                buf.timestamp_millis(),
                record.level(),
                short_target(record.target()),
                name,
                record.args()
            ),
            None => writeln!(
                buf,
                "{} {style}{:5}{style:#} {}: {}",
                buf.timestamp_millis(),
                record.level(),
                short_target(record.target()),
                record.args()
            ),
        }
    });

    let _ = builder.try_init();
}

/// Stopwatch for one job or batch; logs the total at debug level on drop
pub struct Timer {
    name: String,
    start: Instant,
    lap: Instant,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        log::trace!("{}: started", name);
        let now = Instant::now();
        Self {
            name,
            start: now,
            lap: now,
        }
    }

    /// Milliseconds since the timer started
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Milliseconds since the previous lap (or the start), then begin a new lap
    pub fn lap_ms(&mut self) -> f64 {
        let now = Instant::now();
        let ms = now.duration_since(self.lap).as_secs_f64() * 1000.0;
        self.lap = now;
        ms
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::log!(Level::Debug, "{}: {:.3}ms", self.name, self.elapsed_ms());
    }
}
