//! Error taxonomy for tool provisioning.
//!
//! Only [`ProvisionError::Network`] is retried by the downloader. Every other
//! variant surfaces on first occurrence, usually wrapped in
//! [`ProvisionError::Context`] naming the operation that failed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Connection failure, timeout, or a body stream that broke mid-transfer.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("could not resolve sha256 for {target}: {reason}")]
    ChecksumResolution { target: String, reason: String },

    #[error("{label} sha256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        label: String,
        expected: String,
        actual: String,
    },

    #[error("invalid sha256 digest {0:?}")]
    InvalidDigest(String),

    #[error("unsupported payload: {0}")]
    Format(String),

    #[error("{context}: {source}")]
    Filesystem {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("release lookup failed: {0}")]
    ReleaseLookup(String),

    #[error("could not run {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("operation canceled")]
    Cancelled,

    #[error("{operation}: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

impl ProvisionError {
    pub(crate) fn fs(context: impl Into<String>, source: io::Error) -> Self {
        Self::Filesystem {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            source,
        }
    }

    /// Wraps this error with the name of the operation that produced it.
    pub fn context(self, operation: impl Into<String>) -> Self {
        Self::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error beneath any context layers.
    pub fn root(&self) -> &ProvisionError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true for transient network failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Network { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_body()
            }
            _ => false,
        }
    }

    /// Returns true if the caller canceled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_context_layers() {
        let err = ProvisionError::Cancelled
            .context("download yt-dlp.exe")
            .context("ensure yt-dlp.exe");
        assert!(matches!(err.root(), ProvisionError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_context_message_names_operation() {
        let err = ProvisionError::HttpStatus {
            url: "https://example.com/x".to_string(),
            status: 404,
        }
        .context("could not download ffmpeg.exe");
        let msg = err.to_string();
        assert!(msg.starts_with("could not download ffmpeg.exe"));
        assert!(msg.contains("404"));
    }

    #[test]
    fn test_only_network_errors_are_retryable() {
        let status = ProvisionError::HttpStatus {
            url: "https://example.com".to_string(),
            status: 503,
        };
        assert!(!status.is_retryable());
        assert!(!ProvisionError::Cancelled.is_retryable());
        assert!(!ProvisionError::Format("x".to_string()).is_retryable());
        let mismatch = ProvisionError::ChecksumMismatch {
            label: "yt-dlp.exe".to_string(),
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        };
        assert!(!mismatch.is_retryable());
    }
}
