//! Tool catalog with hardcoded definitions.
//!
//! This module contains the static definitions for the two tools ytgrab
//! provisions: where they come from and how their digests are found.

use super::types::{ArchiveEntry, ChecksumSource, ExternalToolId, ToolSpec};

// ============================================================================
// yt-dlp Definition
// ============================================================================

const YTDLP_BINARY_URL: &str =
    "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe";

const YTDLP_CHECKSUMS_URL: &str =
    "https://github.com/yt-dlp/yt-dlp/releases/latest/download/SHA2-256SUMS";

const YTDLP_DEFINITION: ToolSpec = ToolSpec {
    id: ExternalToolId::YtDlp,
    display_name: "yt-dlp",
    default_source_url: YTDLP_BINARY_URL,
    checksum: ChecksumSource::ReleaseManifest {
        url: YTDLP_CHECKSUMS_URL,
        target: "yt-dlp.exe",
    },
    archive_entry: None,
};

// ============================================================================
// FFmpeg Definition
// ============================================================================

const FFMPEG_ARCHIVE_URL: &str = "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip";

const FFMPEG_DEFINITION: ToolSpec = ToolSpec {
    id: ExternalToolId::Ffmpeg,
    display_name: "FFmpeg",
    default_source_url: FFMPEG_ARCHIVE_URL,
    checksum: ChecksumSource::SiblingManifests,
    archive_entry: Some(ArchiveEntry {
        base_name: "ffmpeg.exe",
        preferred_dir: "bin",
    }),
};

// ============================================================================
// Catalog Access
// ============================================================================

/// Returns the static definition for a tool.
pub fn tool_spec(id: ExternalToolId) -> &'static ToolSpec {
    match id {
        ExternalToolId::YtDlp => &YTDLP_DEFINITION,
        ExternalToolId::Ffmpeg => &FFMPEG_DEFINITION,
    }
}

/// Returns every tool definition.
pub fn all_tool_specs() -> Vec<&'static ToolSpec> {
    ExternalToolId::all().iter().map(|id| tool_spec(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_spec_lookup() {
        for id in ExternalToolId::all() {
            let spec = tool_spec(*id);
            assert_eq!(spec.id, *id);
            assert!(spec.default_source_url.starts_with("https://"));
        }
        assert_eq!(all_tool_specs().len(), 2);
    }

    #[test]
    fn test_ytdlp_uses_release_manifest() {
        let spec = tool_spec(ExternalToolId::YtDlp);
        assert_eq!(spec.file_name(), "yt-dlp.exe");
        assert!(spec.archive_entry.is_none());
        match spec.checksum {
            ChecksumSource::ReleaseManifest { url, target } => {
                assert!(url.ends_with("SHA2-256SUMS"));
                assert_eq!(target, "yt-dlp.exe");
            }
            other => panic!("unexpected checksum source {other:?}"),
        }
    }

    #[test]
    fn test_ffmpeg_is_archive_with_bin_entry() {
        let spec = tool_spec(ExternalToolId::Ffmpeg);
        assert_eq!(spec.checksum, ChecksumSource::SiblingManifests);
        let entry = spec.archive_entry.unwrap();
        assert_eq!(entry.base_name, "ffmpeg.exe");
        assert_eq!(entry.preferred_dir, "bin");
        assert!(spec.default_source_url.ends_with(".zip"));
    }
}
