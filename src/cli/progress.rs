//! Progress bar utilities for CLI output
//!
//! Progress bars are driven by [`ScanEvent`]s, one bar per scan stage.
//! Messages printed through the display suspend the bar so log lines and
//! group reports do not tear it.

use crate::scan::{ScanEvent, ScanProgress, ScanStage};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

// ============================================================================
// Styles - Consistent visual appearance
// ============================================================================

/// Get the spinner style used before the comic count is known
fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷")
}

/// Get the progress bar style for a running stage
fn progress_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.green} {prefix:>10} [{bar:40.cyan/dim}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╾─")
}

/// Get the style for completed stages
fn completed_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  ✓ {prefix:>10} [{bar:40.green/dim}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━━")
}

// ============================================================================
// Console output helpers
// ============================================================================

/// Print a header section with a box
pub fn print_header(title: &str) {
    let width = 68;
    let title_padded = format!("{:^width$}", title, width = width - 4);
    println!();
    println!("╔{}╗", "═".repeat(width - 2));
    println!("║{}║", title_padded);
    println!("╚{}╝", "═".repeat(width - 2));
    println!();
}

/// Print a section divider
pub fn print_divider() {
    println!();
    println!("{}", "─".repeat(60));
    println!();
}

/// Print a success message with checkmark
pub fn print_success(msg: &str) {
    println!("  ✓ {}", msg);
}

/// Print an info message with bullet
pub fn print_info(msg: &str) {
    println!("  • {}", msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("  ⚠ {}", msg);
}

/// Print an error message
pub fn print_error(msg: &str) {
    println!("  ✗ {}", msg);
}

// ============================================================================
// Scan progress display
// ============================================================================

/// Renders coordinator events as one progress bar per stage
pub struct ScanProgressDisplay {
    bar: ProgressBar,
    stage: Option<ScanStage>,
}

impl ScanProgressDisplay {
    /// Create a display showing a discovery spinner
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message("Discovering comics...");

        Self { bar, stage: None }
    }

    /// Update the display for one event
    pub fn handle(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::Started { comics, .. } => {
                self.log(&format!("Found {} comics", comics));
            }
            ScanEvent::StageChanged(stage) => self.begin_stage(*stage),
            ScanEvent::Progress(progress) => self.update(progress),
            ScanEvent::ComicFailed { path, error } => {
                self.log(&format!("⚠ {}: {}", path.display(), error));
            }
            ScanEvent::Paused => self.bar.set_message("paused"),
            ScanEvent::Resumed => self.bar.set_message("resumed"),
            ScanEvent::Stopping => self.bar.set_message("stopping..."),
            ScanEvent::GroupFound { .. } => {}
            ScanEvent::Completed(_) => self.finish_stage(),
            ScanEvent::Stopped(_) => {
                self.bar.abandon_with_message("stopped");
            }
            ScanEvent::Failed { error } => {
                self.bar.abandon_with_message(format!("✗ {}", error));
            }
        }
    }

    fn begin_stage(&mut self, stage: ScanStage) {
        self.finish_stage();

        let bar = ProgressBar::new(0);
        bar.set_style(progress_bar_style());
        bar.set_prefix(stage.name());
        bar.enable_steady_tick(Duration::from_millis(100));

        // the discovery spinner is cleared, earlier stage bars stay on screen
        if self.stage.is_none() {
            self.bar.finish_and_clear();
        }
        self.bar = bar;
        self.stage = Some(stage);
    }

    fn finish_stage(&mut self) {
        if self.stage.is_some() && !self.bar.is_finished() {
            self.bar.set_style(completed_style());
            self.bar.finish();
        }
    }

    fn update(&self, progress: &ScanProgress) {
        if self.stage != Some(progress.stage) {
            return;
        }

        self.bar.set_length(progress.total as u64);
        self.bar.set_position(progress.processed as u64);

        let message = match progress.stage {
            ScanStage::Extracting => format!(
                "{} cached, {} errors",
                progress.cache_hits, progress.errors
            ),
            ScanStage::Detecting => format!("{} groups", progress.groups_found),
        };
        self.bar.set_message(message);
    }

    /// Print a line without tearing the bar
    pub fn log(&self, msg: &str) {
        self.bar.suspend(|| {
            println!("  {}", msg);
        });
    }
}

impl Default for ScanProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Utility functions
// ============================================================================

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

// ============================================================================
// Dual writer for file + console logging
// ============================================================================

/// A writer that writes to both console and file
///
/// Used for logging to both stderr and a log file simultaneously.
pub struct DualWriter {
    pub console: std::io::Stderr,
    pub file: std::fs::File,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.console.write(buf);
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================
