//! Staged progress tracking for one download session.
//!
//! A session downloads a fixed number of files (video, audio, subtitles) and
//! yt-dlp reports a percentage per file. The tracker folds those per-file
//! percentages into one fraction for the whole session:
//!
//! ```text
//! fraction = (stage_index + stage_fraction) / total_stages
//! ```
//!
//! Both read loops of a supervised process feed the same tracker, so all
//! state sits behind a single mutex.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use super::parse::{classify_line, compact_status, LineKind};
use super::plan::SessionPlan;

/// Offset below the end of the current stage reported while merging.
const MERGE_OFFSET: f64 = 0.1;
/// Offset below the end of the current stage reported while embedding subtitles.
const EMBED_OFFSET: f64 = 0.05;

/// One progress update produced from an output line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Overall completion in `[0, 1]`.
    pub fraction: f64,
    /// Short human-readable status.
    pub status: String,
}

#[derive(Debug)]
struct StageState {
    total_stages: usize,
    stage_index: usize,
    has_stage: bool,
    stage_fraction: f64,
    seen: HashSet<String>,
    /// Highest fraction handed out so far.
    high_water: f64,
}

impl StageState {
    fn overall(&self) -> f64 {
        let total = self.total_stages as f64;
        ((self.stage_index as f64 + self.stage_fraction) / total).clamp(0.0, 1.0)
    }

    /// Fraction just below the end of the active stage.
    fn near_stage_end(&self, offset: f64) -> f64 {
        let total = self.total_stages as f64;
        ((self.stage_index as f64 + 1.0 - offset) / total).clamp(0.0, 1.0)
    }

    fn emit(&mut self, fraction: f64, status: String) -> ProgressUpdate {
        self.high_water = self.high_water.max(fraction);
        ProgressUpdate {
            fraction: self.high_water,
            status,
        }
    }
}

/// Converts yt-dlp output lines into a monotonic session fraction.
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<StageState>,
}

impl ProgressTracker {
    /// Creates a tracker for a session, or `None` for playlists, where the
    /// number of files is unknown up front.
    pub fn new(plan: &SessionPlan) -> Option<Self> {
        plan.is_staged()
            .then(|| Self::with_stages(plan.total_stages()))
    }

    /// Creates a tracker for a fixed number of stages (at least one).
    pub fn with_stages(total_stages: usize) -> Self {
        Self {
            state: Mutex::new(StageState {
                total_stages: total_stages.max(1),
                stage_index: 0,
                has_stage: false,
                stage_fraction: 0.0,
                seen: HashSet::new(),
                high_water: 0.0,
            }),
        }
    }

    pub fn total_stages(&self) -> usize {
        self.state.lock().total_stages
    }

    /// Feeds one raw output line.
    ///
    /// Returns `None` when the line carries no progress information.
    pub fn update(&self, line: &str) -> Option<ProgressUpdate> {
        let kind = classify_line(line);
        let mut state = self.state.lock();

        match kind {
            LineKind::Destination(path) => {
                if !state.seen.insert(path) {
                    return None;
                }
                if state.has_stage {
                    state.stage_index = (state.stage_index + 1).min(state.total_stages - 1);
                } else {
                    state.has_stage = true;
                    state.stage_index = 0;
                }
                state.stage_fraction = 0.0;
                debug!(
                    "Progress stage {}/{}",
                    state.stage_index + 1,
                    state.total_stages
                );

                let status = format!(
                    "Downloading ({}/{})...",
                    state.stage_index + 1,
                    state.total_stages
                );
                let fraction = state.overall();
                Some(state.emit(fraction, status))
            }
            LineKind::Percent(parsed) => {
                if !state.has_stage {
                    return None;
                }
                state.stage_fraction = state.stage_fraction.max(parsed.clamp(0.0, 1.0));

                let status = compact_status(line).unwrap_or_else(|| "Downloading...".to_string());
                let fraction = state.overall();
                Some(state.emit(fraction, status))
            }
            LineKind::Merge => {
                let fraction = state.near_stage_end(MERGE_OFFSET);
                Some(state.emit(fraction, "Merging formats...".to_string()))
            }
            LineKind::EmbedSubtitle => {
                let fraction = state.near_stage_end(EMBED_OFFSET);
                Some(state.emit(fraction, "Embedding subtitles...".to_string()))
            }
            LineKind::Other => None,
        }
    }
}
