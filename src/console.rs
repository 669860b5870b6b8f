//! Console stand-in for the display device.
//!
//! Renders the report as a framed text panel on a writer (stdout for the
//! binary), prints errors to stderr and records wake requests instead of
//! arming a hardware timer.

use anyhow::Result;
use std::io::Write;

use crate::cycle::{Device, RenderMetadata};
use crate::extract::ExtractedReport;
use crate::schedule::RefreshKind;

const PANEL_WIDTH: usize = 48;

pub struct ConsoleDevice<W: Write> {
    out: W,
    /// Last `(after_secs, allow_deep_sleep)` passed to `schedule_wake`.
    pub wake_request: Option<(u64, bool)>,
    /// Messages passed to `show_error`, oldest first.
    pub errors: Vec<String>,
}

impl ConsoleDevice<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleDevice<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            wake_request: None,
            errors: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, report: &ExtractedReport, meta: &RenderMetadata) -> std::io::Result<()> {
        let rule = "=".repeat(PANEL_WIDTH);
        writeln!(self.out, "{}", rule)?;
        writeln!(self.out, " {}", meta.title)?;
        writeln!(self.out, "{}", "-".repeat(PANEL_WIDTH))?;
        writeln!(self.out, " created: {}", meta.created)?;
        writeln!(self.out)?;
        for line in report.body.trim_end_matches('\n').lines() {
            writeln!(self.out, " {}", line)?;
        }
        writeln!(self.out)?;
        writeln!(
            self.out,
            " next refresh in {} {}",
            meta.refresh_interval,
            meta.interval_unit.label()
        )?;
        writeln!(self.out, "{}", rule)?;
        self.out.flush()
    }
}

impl<W: Write> Device for ConsoleDevice<W> {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, report: &ExtractedReport, meta: &RenderMetadata) -> RefreshKind {
        if let Err(e) = self.draw(report, meta) {
            tracing::warn!(error = %e, "failed to write panel");
        }
        meta.refresh
    }

    fn show_error(&mut self, message: &str) {
        eprintln!("Error: {}", message);
        self.errors.push(message.to_string());
    }

    fn schedule_wake(&mut self, after_secs: u64, allow_deep_sleep: bool) {
        self.wake_request = Some((after_secs, allow_deep_sleep));
    }
}
