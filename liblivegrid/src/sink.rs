//! The rendering boundary.
//!
//! Each tracked run owns exactly one surface, opened when the run starts and
//! abandoned when it stops. There is no ambient global rendering context; the
//! tracker drives its surface explicitly through these traits.

use super::error::SinkError;
use super::grid::Grid;

/// Opens one rendering surface per run
pub trait GridSinkProvider: Send + Sync {
    fn open(&self, run_uid: &str) -> Result<Box<dyn GridSink>, SinkError>;
}

/// A live view of one run's grid
pub trait GridSink: Send {
    /// Replace the displayed data with the current grid contents
    fn render(&mut self, grid: &Grid) -> Result<(), SinkError>;

    /// Fire-and-forget repaint request; the surface repaints when its event
    /// loop next gets a chance
    fn request_redraw(&mut self);
}

/// Sink that logs each rendered grid. The worker's default when no display
/// is attached.
pub struct LogSink {
    run_uid: String,
}

impl GridSink for LogSink {
    fn render(&mut self, grid: &Grid) -> Result<(), SinkError> {
        for row in grid.cells().rows() {
            let line: Vec<String> = row.iter().map(|v| format!("{v:>8.2}")).collect();
            log::debug!("[{}] {}", self.run_uid, line.join(" "));
        }
        Ok(())
    }

    fn request_redraw(&mut self) {
        log::trace!("[{}] redraw requested", self.run_uid);
    }
}

pub struct LogSinkProvider;

impl GridSinkProvider for LogSinkProvider {
    fn open(&self, run_uid: &str) -> Result<Box<dyn GridSink>, SinkError> {
        Ok(Box::new(LogSink {
            run_uid: run_uid.to_string(),
        }))
    }
}
