// Terminal presentation: the upload progress bar and the final JSON output.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

use crate::api::ConversionResult;
use crate::progress::ProgressSink;

const BAR_TEMPLATE: &str =
    "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Progress bar drawn on stderr. Created hidden and sized on `begin`, so a
/// failed run before the upload never draws anything.
pub struct ConsoleProgress {
    bar: ProgressBar,
    label: String,
}

impl ConsoleProgress {
    pub fn new(label: impl Into<String>) -> Self {
        ConsoleProgress {
            bar: ProgressBar::hidden(),
            label: label.into(),
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        ConsoleProgress::new("Upload progress")
    }
}

impl ProgressSink for ConsoleProgress {
    fn begin(&mut self, total: u64) {
        let bar = ProgressBar::new(total);
        // The template is a constant; fall back to the default bar rather
        // than fail mid-upload.
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(self.label.clone());
        self.bar = bar;
    }

    fn advance(&mut self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}

impl Drop for ConsoleProgress {
    fn drop(&mut self) {
        // Leave the terminal clean if the upload was aborted mid-way.
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

/// Write the conversion result as indented JSON followed by a newline.
pub fn print_result<W: Write>(out: &mut W, result: &ConversionResult) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, result)?;
    writeln!(out)?;
    Ok(())
}
