//! Payload classification by magic bytes.
//!
//! File names and source URLs are never consulted: mirrors routinely serve
//! archives under `.exe` names and vice versa.

use std::io::Read;
use std::path::Path;

use crate::error::{ProvisionError, Result};

/// PE/COFF images start with the DOS header magic.
const EXECUTABLE_MAGIC: &[u8] = b"MZ";

/// Zip local file header.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Executable,
    ZipArchive,
    Unknown,
}

/// Classifies a byte prefix.
pub fn classify_bytes(head: &[u8]) -> PayloadKind {
    if head.starts_with(ZIP_MAGIC) {
        PayloadKind::ZipArchive
    } else if head.starts_with(EXECUTABLE_MAGIC) {
        PayloadKind::Executable
    } else {
        PayloadKind::Unknown
    }
}

/// Classifies a file by reading at most its first four bytes.
///
/// # Errors
///
/// Returns a filesystem error if the file cannot be opened or read.
pub fn classify(path: &Path) -> Result<PayloadKind> {
    let file = std::fs::File::open(path)
        .map_err(|e| ProvisionError::fs(format!("failed to open {}", path.display()), e))?;

    let mut head = Vec::with_capacity(ZIP_MAGIC.len());
    file.take(ZIP_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .map_err(|e| ProvisionError::fs(format!("failed to read {}", path.display()), e))?;

    Ok(classify_bytes(&head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_bytes() {
        assert_eq!(classify_bytes(b"MZ\x90\x00"), PayloadKind::Executable);
        assert_eq!(classify_bytes(b"PK\x03\x04rest"), PayloadKind::ZipArchive);
        assert_eq!(classify_bytes(b"PK\x05\x06"), PayloadKind::Unknown);
        assert_eq!(classify_bytes(b"M"), PayloadKind::Unknown);
        assert_eq!(classify_bytes(b""), PayloadKind::Unknown);
        assert_eq!(classify_bytes(b"<html>"), PayloadKind::Unknown);
    }

    #[test]
    fn test_classify_ignores_file_name() {
        let dir = TempDir::new().unwrap();

        let zip_named_exe = dir.path().join("ffmpeg.exe");
        std::fs::write(&zip_named_exe, b"PK\x03\x04....").unwrap();
        assert_eq!(classify(&zip_named_exe).unwrap(), PayloadKind::ZipArchive);

        let exe_named_zip = dir.path().join("ffmpeg.zip");
        std::fs::write(&exe_named_zip, b"MZ......").unwrap();
        assert_eq!(classify(&exe_named_zip).unwrap(), PayloadKind::Executable);
    }

    #[test]
    fn test_classify_short_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let short = dir.path().join("short");
        std::fs::write(&short, b"P").unwrap();
        assert_eq!(classify(&short).unwrap(), PayloadKind::Unknown);

        assert!(classify(&dir.path().join("missing")).is_err());
    }
}
