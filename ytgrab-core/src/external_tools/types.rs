//! Core types for external tool provisioning.
//!
//! This module defines the foundational types used across the external tools
//! infrastructure: tool identifiers, checksum strategies, archive layout, and
//! the static tool specification.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// External Tool Identifiers
// ============================================================================

/// Unique identifier for each external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalToolId {
    /// yt-dlp - the video downloader driven by ytgrab.
    YtDlp,
    /// FFmpeg - used by yt-dlp for merging and post-processing.
    Ffmpeg,
}

impl ExternalToolId {
    /// Returns all available tool IDs.
    pub fn all() -> &'static [ExternalToolId] {
        &[Self::YtDlp, Self::Ffmpeg]
    }

    /// Returns the lowercase string identifier for this tool.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YtDlp => "ytdlp",
            Self::Ffmpeg => "ffmpeg",
        }
    }

    /// Returns the canonical file name the tool is installed under.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::YtDlp => "yt-dlp.exe",
            Self::Ffmpeg => "ffmpeg.exe",
        }
    }

    /// Returns the uppercase key used in `YTGRAB_<KEY>_*` variables.
    pub fn env_key(&self) -> &'static str {
        match self {
            Self::YtDlp => "YTDLP",
            Self::Ffmpeg => "FFMPEG",
        }
    }

    /// Returns the prefix for this tool's transient download files.
    pub fn temp_prefix(&self) -> String {
        format!("{}{}-", super::paths::TEMP_PREFIX, self.as_str())
    }
}

impl fmt::Display for ExternalToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

impl std::str::FromStr for ExternalToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ytdlp" | "yt-dlp" | "yt-dlp.exe" => Ok(Self::YtDlp),
            "ffmpeg" | "ffmpeg.exe" => Ok(Self::Ffmpeg),
            _ => Err(format!("Unknown tool: {}", s)),
        }
    }
}

// ============================================================================
// Checksum Strategy
// ============================================================================

/// Where the expected digest for a tool's default source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumSource {
    /// A fixed release manifest listing every asset of the release.
    ReleaseManifest {
        url: &'static str,
        /// Asset name to look up in the manifest.
        target: &'static str,
    },
    /// Manifests published next to the source archive. Candidates are
    /// derived from the (possibly overridden) source URL and the lookup
    /// target is the base name of that URL.
    SiblingManifests,
}

// ============================================================================
// Archive Layout
// ============================================================================

/// Which archive member holds the executable, for tools shipped as zips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Base name of the wanted member (matched case-insensitively).
    pub base_name: &'static str,
    /// Directory segment preferred when several members match.
    pub preferred_dir: &'static str,
}

// ============================================================================
// Tool Specification
// ============================================================================

/// Complete static definition of an external tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Unique identifier for this tool.
    pub id: ExternalToolId,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Default download URL (binary or archive).
    pub default_source_url: &'static str,
    /// How the expected digest is located.
    pub checksum: ChecksumSource,
    /// Archive member to extract when the payload turns out to be a zip.
    pub archive_entry: Option<ArchiveEntry>,
}

impl ToolSpec {
    /// Returns the file name the tool is installed under.
    pub fn file_name(&self) -> &'static str {
        self.id.file_name()
    }

    /// Returns the source URL, honoring an override when present.
    pub fn source_url<'a>(&'a self, source_override: Option<&'a str>) -> &'a str {
        source_override.unwrap_or(self.default_source_url)
    }
}
