//! Terminal progress rendering.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use ytgrab_core::{DownloadEvent, DownloadPhase, ExternalToolId, ProgressUpdate, SessionPlan};

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";
const TICK_INTERVAL_MS: u64 = 80;

/// Resolution of the session bar; fractions map onto `0..=SESSION_TICKS`.
const SESSION_TICKS: u64 = 1000;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.cyan} {prefix:<11} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_CHARS)
}

fn byte_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.cyan} {prefix:<11} [{bar:30.cyan/dim}] {bytes}/{total_bytes} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}

// =============================================================================
// Tool Downloads
// =============================================================================

/// One bar per tool being provisioned.
#[derive(Default)]
pub struct DownloadBars {
    multi: MultiProgress,
    bars: Mutex<HashMap<ExternalToolId, ProgressBar>>,
}

impl DownloadBars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress callback for provisioning calls.
    pub fn handle(&self, event: DownloadEvent) {
        let mut bars = self.bars.lock();
        let bar = bars.entry(event.tool).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(spinner_style());
            bar.set_prefix(event.tool.file_name());
            bar.enable_steady_tick(Duration::from_millis(TICK_INTERVAL_MS));
            bar
        });

        match event.phase {
            DownloadPhase::Start => bar.set_message("connecting"),
            DownloadPhase::Downloading => {
                if let Some(total) = event.total_bytes {
                    if bar.length() != Some(total) {
                        bar.set_length(total);
                        bar.set_style(byte_style());
                    }
                }
                bar.set_position(event.downloaded_bytes);
                bar.set_message("");
            }
            DownloadPhase::Retry => {
                bar.set_message(format!("retrying (attempt {})", event.attempt + 1));
            }
            DownloadPhase::Canceled => bar.abandon_with_message("canceled"),
            DownloadPhase::Done => bar.set_message("verifying"),
            DownloadPhase::ExtractStart => bar.set_message("extracting"),
            DownloadPhase::ExtractDone => bar.set_message("extracted"),
        }
    }

    /// Prints a line above the bars.
    pub fn println(&self, line: &str) {
        if self.bars.lock().is_empty() {
            eprintln!("{}", line);
        } else {
            let _ = self.multi.println(line);
        }
    }

    pub fn finish(&self) {
        for bar in self.bars.lock().values() {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
    }
}

// =============================================================================
// Download Session
// =============================================================================

/// Bar for a yt-dlp session, sized in fractional ticks.
pub fn session_bar(plan: &SessionPlan) -> ProgressBar {
    let bar = ProgressBar::new(SESSION_TICKS);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.cyan} [{bar:30.cyan/dim}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸━"),
    );
    bar.set_message(if plan.playlist {
        "Starting playlist..."
    } else {
        "Starting..."
    });
    bar.enable_steady_tick(Duration::from_millis(TICK_INTERVAL_MS));
    bar
}

pub fn set_fraction(bar: &ProgressBar, update: &ProgressUpdate) {
    let ticks = (update.fraction.clamp(0.0, 1.0) * SESSION_TICKS as f64).round() as u64;
    bar.set_position(ticks);
    bar.set_message(update.status.clone());
}
