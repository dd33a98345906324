//! Cache and temp-folder path management for external tools.
//!
//! Installed tools live in a per-application cache directory under fixed
//! canonical names:
//!
//! - Linux: `~/.cache/ytgrab/`
//! - macOS: `~/Library/Caches/ytgrab/`
//! - Windows: `C:\Users\<User>\AppData\Local\ytgrab\`
//!
//! Transient downloads go to the OS temp directory under `ytgrab-<tool>-*`
//! names so a maintenance sweep can find leftovers from crashed runs.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::types::ExternalToolId;
use crate::error::{ProvisionError, Result};

/// Prefix shared by every transient download file.
pub const TEMP_PREFIX: &str = "ytgrab-";

/// Suffix of the same-directory staging sibling used during install.
pub const STAGING_SUFFIX: &str = ".new";

// ============================================================================
// Path Resolution
// ============================================================================

/// Returns the install path of a tool inside `cache_dir`.
pub fn tool_path(cache_dir: &Path, tool: ExternalToolId) -> PathBuf {
    cache_dir.join(tool.file_name())
}

/// Returns the staging sibling for `target` (`target + ".new"`).
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Ensures the cache directory exists.
///
/// # Errors
///
/// Returns an error if the directory cannot be created (e.g., permission issues).
pub fn ensure_cache_dir(cache_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(cache_dir).map_err(|e| {
        ProvisionError::fs(format!("failed to create {}", cache_dir.display()), e)
    })
}

// ============================================================================
// Temp Sweep
// ============================================================================

/// Removes leftover download temps from the OS temp directory.
///
/// Returns the number of files removed.
pub fn cleanup_download_temps() -> usize {
    cleanup_download_temps_in(&std::env::temp_dir())
}

/// Removes regular files in `dir` matching any tool's temp prefix.
///
/// Failures to remove individual files are logged and skipped.
pub fn cleanup_download_temps_in(dir: &Path) -> usize {
    let mut removed = 0;

    for tool in ExternalToolId::all() {
        let pattern = dir.join(format!("{}*", tool.temp_prefix()));
        let Some(pattern) = pattern.to_str() else {
            warn!("Temp dir is not valid UTF-8, skipping sweep: {}", dir.display());
            return removed;
        };

        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Invalid temp sweep pattern {}", pattern);
                continue;
            }
        };

        for path in entries.flatten() {
            if !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale download temp {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!(error = %e, "Failed to remove {}", path.display()),
            }
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tool_path_uses_canonical_names() {
        let cache = Path::new("/cache/ytgrab");
        assert_eq!(
            tool_path(cache, ExternalToolId::YtDlp),
            cache.join("yt-dlp.exe")
        );
        assert_eq!(
            tool_path(cache, ExternalToolId::Ffmpeg),
            cache.join("ffmpeg.exe")
        );
    }

    #[test]
    fn test_staging_path_is_sibling() {
        let target = Path::new("/cache/ytgrab/yt-dlp.exe");
        let staging = staging_path(target);
        assert_eq!(staging, Path::new("/cache/ytgrab/yt-dlp.exe.new"));
        assert_eq!(staging.parent(), target.parent());
    }

    #[test]
    fn test_ensure_cache_dir_creates_nested() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("a").join("b");
        ensure_cache_dir(&cache).unwrap();
        assert!(cache.is_dir());
    }

    #[test]
    fn test_cleanup_removes_only_tool_temps() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("ytgrab-ytdlp-abc123"), b"partial").unwrap();
        std::fs::write(dir.join("ytgrab-ffmpeg-xyz"), b"partial").unwrap();
        std::fs::write(dir.join("ytgrab-other-file"), b"keep").unwrap();
        std::fs::write(dir.join("unrelated.txt"), b"keep").unwrap();
        std::fs::create_dir(dir.join("ytgrab-ffmpeg-dir")).unwrap();

        assert_eq!(cleanup_download_temps_in(dir), 2);
        assert!(!dir.join("ytgrab-ytdlp-abc123").exists());
        assert!(!dir.join("ytgrab-ffmpeg-xyz").exists());
        assert!(dir.join("ytgrab-other-file").exists());
        assert!(dir.join("unrelated.txt").exists());
        assert!(dir.join("ytgrab-ffmpeg-dir").is_dir());

        assert_eq!(cleanup_download_temps_in(dir), 0);
    }
}
