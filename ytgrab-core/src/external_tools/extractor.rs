//! Zip extraction for tools shipped inside archives.
//!
//! Only the single wanted executable is pulled out; nothing else in the
//! archive touches the disk.

use std::fs::File;
use std::io;
use std::path::Path;

use tempfile::TempPath;
use tracing::{debug, info};

use super::sniff::{classify, PayloadKind};
use super::types::ArchiveEntry;
use crate::error::{ProvisionError, Result};

// ============================================================================
// Entry Selection
// ============================================================================

/// Picks the archive member to extract from a list of member names.
///
/// A member matches when its last path segment equals `entry.base_name`
/// (case-insensitive). The first match under a `preferred_dir` segment wins,
/// otherwise the first match overall.
pub fn select_entry<'a, I>(names: I, entry: &ArchiveEntry) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut first_match = None;

    for (index, raw) in names.into_iter().enumerate() {
        let normalized = raw.replace('\\', "/");
        let mut segments = normalized.split('/').filter(|s| !s.is_empty()).rev();

        let Some(last) = segments.next() else {
            continue;
        };
        if normalized.ends_with('/') || !last.eq_ignore_ascii_case(entry.base_name) {
            continue;
        }

        if segments.any(|dir| dir.eq_ignore_ascii_case(entry.preferred_dir)) {
            return Some(index);
        }
        first_match.get_or_insert(index);
    }

    first_match
}

// ============================================================================
// ZIP Extraction
// ============================================================================

/// Extracts the wanted executable from `archive_path` into a new temp file.
///
/// # Arguments
///
/// * `archive_path` - Path to the verified zip payload.
/// * `entry` - Which member to pull out.
/// * `temp_dir` - Where the extracted temp file is created.
/// * `prefix` - Temp file name prefix (`ytgrab-<tool>-`).
///
/// # Errors
///
/// Returns [`ProvisionError::Format`] if the zip is unreadable, holds no
/// matching member, or the member is not an executable.
pub fn extract_entry(
    archive_path: &Path,
    entry: &ArchiveEntry,
    temp_dir: &Path,
    prefix: &str,
) -> Result<TempPath> {
    info!(
        "Extracting {} from {}",
        entry.base_name,
        archive_path.display()
    );

    let file = File::open(archive_path).map_err(|e| {
        ProvisionError::fs(format!("failed to open zip {}", archive_path.display()), e)
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ProvisionError::Format(format!("could not read zip: {e}")))?;

    let file_names: Vec<String> = (0..archive.len())
        .map(|i| {
            archive
                .name_for_index(i)
                .map(str::to_string)
                .unwrap_or_default()
        })
        .collect();
    debug!("Zip holds {} entries", file_names.len());

    let index = select_entry(file_names.iter().map(String::as_str), entry).ok_or_else(|| {
        ProvisionError::Format(format!("{} not found in archive", entry.base_name))
    })?;

    let mut member = archive
        .by_index(index)
        .map_err(|e| ProvisionError::Format(format!("could not read zip entry: {e}")))?;
    debug!("Selected archive entry {}", member.name());

    let mut out = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile_in(temp_dir)
        .map_err(|e| ProvisionError::fs("failed to create extraction temp file", e))?;
    io::copy(&mut member, out.as_file_mut())
        .map_err(|e| ProvisionError::fs(format!("failed to extract {}", entry.base_name), e))?;

    let path = out.into_temp_path();
    match classify(&path)? {
        PayloadKind::Executable => Ok(path),
        other => Err(ProvisionError::Format(format!(
            "archive entry {} is {:?}, not an executable",
            entry.base_name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const ENTRY: ArchiveEntry = ArchiveEntry {
        base_name: "ffmpeg.exe",
        preferred_dir: "bin",
    };

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_select_prefers_bin_directory() {
        let names = [
            "ffmpeg-7.0/doc/ffmpeg.exe",
            "ffmpeg-7.0/bin/ffprobe.exe",
            "ffmpeg-7.0/bin/FFMPEG.EXE",
        ];
        assert_eq!(select_entry(names, &ENTRY), Some(2));
    }

    #[test]
    fn test_select_falls_back_to_first_match() {
        let names = ["readme.txt", "tools/ffmpeg.exe", "other/ffmpeg.exe"];
        assert_eq!(select_entry(names, &ENTRY), Some(1));
    }

    #[test]
    fn test_select_handles_backslashes_and_dirs() {
        let names = ["ffmpeg.exe/", "build\\bin\\ffmpeg.exe"];
        assert_eq!(select_entry(names, &ENTRY), Some(1));
    }

    #[test]
    fn test_select_requires_whole_segment() {
        let names = ["bin/notffmpeg.exe", "bin/ffmpeg.exe.sig"];
        assert_eq!(select_entry(names, &ENTRY), None);
    }

    #[test]
    fn test_extract_entry_from_bin() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("payload.bin");
        write_zip(
            &archive,
            &[
                ("ffmpeg/README.txt", b"readme"),
                ("ffmpeg/doc/ffmpeg.exe", b"MZ wrong one"),
                ("ffmpeg/bin/ffmpeg.exe", b"MZ right one"),
            ],
        );

        let out = extract_entry(&archive, &ENTRY, temp.path(), "ytgrab-ffmpeg-").unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"MZ right one");
        assert!(out
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("ytgrab-ffmpeg-"));
    }

    #[test]
    fn test_extract_rejects_non_executable_entry() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("payload.zip");
        write_zip(&archive, &[("bin/ffmpeg.exe", b"#!/bin/sh\necho hi")]);

        let err = extract_entry(&archive, &ENTRY, temp.path(), "ytgrab-ffmpeg-").unwrap_err();
        assert!(matches!(err, ProvisionError::Format(_)));

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("ytgrab-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_extract_missing_entry() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("payload.zip");
        write_zip(&archive, &[("bin/ffprobe.exe", b"MZ")]);

        let err = extract_entry(&archive, &ENTRY, temp.path(), "ytgrab-ffmpeg-").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_extract_corrupt_zip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("payload.zip");
        std::fs::write(&archive, b"PK\x03\x04 truncated garbage").unwrap();

        let err = extract_entry(&archive, &ENTRY, temp.path(), "ytgrab-ffmpeg-").unwrap_err();
        assert!(matches!(err, ProvisionError::Format(_)));
    }
}
