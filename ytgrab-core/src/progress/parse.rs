//! Heuristic parsing of yt-dlp console output.
//!
//! yt-dlp prints free-form text meant for humans and its wording changes
//! between releases. Everything that inspects that text lives in this module
//! so a format change has one place to land. Recognized shapes:
//!
//! ```text
//! [download] Destination: <path>              -> stage marker
//! [download]  42.0% of 10.00MiB at ... ETA 00:10
//! [ffmpeg] 42.0%                              -> intra-stage percentage
//! [Merger] Merging formats into "<path>"      -> merge marker
//! [EmbedSubtitle] Embedding subtitles in ...  -> subtitle embed marker
//! ```

use std::sync::LazyLock;

use regex::Regex;

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?:download|ffmpeg)\]\s+(\d+(?:\.\d+)?)%").expect("valid percent regex")
});

static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ETA\s+([0-9:]+)").expect("valid ETA regex"));

const DESTINATION_PREFIX: &str = "[download] Destination:";
const MERGER_TAG: &str = "[Merger]";
const EMBED_SUBTITLE_TAG: &str = "[EmbedSubtitle]";

/// User-facing log lines longer than this are cut.
pub const MAX_USER_LOG_LINE: usize = 220;

/// What a single output line means for progress tracking.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// A new output file was announced.
    Destination(String),
    /// Completion of the current file, as a fraction (may exceed 1.0 if the
    /// tool misreports).
    Percent(f64),
    Merge,
    EmbedSubtitle,
    Other,
}

/// Classifies one raw output line.
pub fn classify_line(raw: &str) -> LineKind {
    let line = raw.trim();

    if let Some(dest) = line.strip_prefix(DESTINATION_PREFIX) {
        return LineKind::Destination(dest.trim().to_string());
    }
    if let Some(fraction) = parse_progress(raw) {
        return LineKind::Percent(fraction);
    }
    if line.contains(MERGER_TAG) {
        return LineKind::Merge;
    }
    if line.contains(EMBED_SUBTITLE_TAG) {
        return LineKind::EmbedSubtitle;
    }
    LineKind::Other
}

/// Extracts a `[download]`/`[ffmpeg]` percentage as a fraction.
pub fn parse_progress(line: &str) -> Option<f64> {
    PERCENT_RE
        .captures(line)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .map(|percent| percent / 100.0)
}

/// Short status text for a percentage line, e.g. `Downloading 42.0% (ETA 00:10)`.
pub fn compact_status(line: &str) -> Option<String> {
    let caps = PERCENT_RE.captures(line)?;
    let percent = &caps[1];
    Some(match ETA_RE.captures(line) {
        Some(eta) => format!("Downloading {}% (ETA {})", percent, &eta[1]),
        None => format!("Downloading {}%", percent),
    })
}

/// Decides whether a raw line belongs in the user-facing log.
///
/// Percentage spam is hidden; warnings, errors, destinations, merges,
/// subtitle work and a few informational lines are shown.
pub fn should_show_in_user_log(raw: &str) -> bool {
    let cleaned = raw.replace('\r', "");
    let line = cleaned.trim();

    if line.is_empty() {
        return false;
    }
    if line.contains("[download]") && line.contains("% of") {
        return false;
    }
    if line.starts_with("WARNING:") || line.starts_with("ERROR:") {
        return true;
    }
    if line.starts_with("[youtube]") {
        return line.contains("Extracting URL");
    }
    if line.starts_with("[info]") {
        return [
            "Downloading subtitles:",
            "Downloading 1 format(s):",
            "Downloading 2 format(s):",
            "Writing video subtitles to:",
        ]
        .iter()
        .any(|needle| line.contains(needle));
    }
    if line.contains("[SubtitlesConvertor]")
        || line.contains(MERGER_TAG)
        || line.contains(EMBED_SUBTITLE_TAG)
        || line.starts_with("Deleting original file")
    {
        return true;
    }
    line.starts_with(DESTINATION_PREFIX)
}

/// Cuts a line to [`MAX_USER_LOG_LINE`] bytes on a char boundary.
pub fn truncate_for_log(line: &str) -> String {
    if line.len() <= MAX_USER_LOG_LINE {
        return line.to_string();
    }
    let mut end = MAX_USER_LOG_LINE;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} ...", &line[..end])
}
