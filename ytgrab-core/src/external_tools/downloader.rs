//! Async file downloader with progress reporting and security validation.
//!
//! This module provides streaming download functionality using reqwest.
//! Each attempt streams the body into a fresh `ytgrab-<tool>-*` temp file
//! while hashing it, so multi-hundred-megabyte archives never sit in memory
//! and the digest is ready the moment the transfer ends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::checksum::Sha256Digest;
use super::retry::{retry_with, Clock, RetryPolicy};
use super::types::ExternalToolId;
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};

// ============================================================================
// URL Security Validation
// ============================================================================

/// Validates that a URL is safe for downloading.
///
/// Checks:
/// - URL must parse and have a host
/// - URL scheme must be HTTPS (plain HTTP only when explicitly allowed)
pub fn validate_url(url_str: &str, allow_insecure_http: bool) -> Result<()> {
    let invalid = |reason: &str| ProvisionError::InvalidUrl {
        url: url_str.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(url_str).map_err(|e| invalid(&e.to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_insecure_http => {}
        _ => return Err(invalid("URL must use HTTPS")),
    }

    if url.host_str().is_none() {
        return Err(invalid("URL must have a host"));
    }

    Ok(())
}

/// Builds an HTTP client with the ytgrab User-Agent and a per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("ytgrab/{}", crate::VERSION))
        .timeout(timeout)
        .build()
        .map_err(|e| ProvisionError::network("client", e))
}

// ============================================================================
// Download Events
// ============================================================================

/// Lifecycle phase reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Start,
    Downloading,
    Retry,
    Canceled,
    Done,
    ExtractStart,
    ExtractDone,
}

impl DownloadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Downloading => "downloading",
            Self::Retry => "retry",
            Self::Canceled => "canceled",
            Self::Done => "done",
            Self::ExtractStart => "extract_start",
            Self::ExtractDone => "extract_done",
        }
    }
}

/// Progress information during provisioning.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadEvent {
    pub tool: ExternalToolId,
    pub url: String,
    pub phase: DownloadPhase,
    /// Bytes downloaded so far in the current attempt.
    pub downloaded_bytes: u64,
    /// Total bytes expected (if known from Content-Length header).
    pub total_bytes: Option<u64>,
    /// 1-based attempt the event belongs to.
    pub attempt: u32,
}

impl DownloadEvent {
    /// Progress percentage (0.0 to 100.0), or None if total is unknown.
    pub fn percent(&self) -> Option<f32> {
        self.total_bytes.map(|total| {
            if total > 0 {
                (self.downloaded_bytes as f32 / total as f32) * 100.0
            } else {
                0.0
            }
        })
    }
}

/// Callback receiving [`DownloadEvent`]s.
pub type ProgressSink<'a> = &'a (dyn Fn(DownloadEvent) + Send + Sync);

/// Progress sink that discards every event.
pub fn no_progress(_: DownloadEvent) {}

// ============================================================================
// Download Session
// ============================================================================

/// Counters of the most recent event, shared across attempts of one fetch.
#[derive(Debug, Default, Clone, Copy)]
struct InFlight {
    attempt: u32,
    downloaded_bytes: u64,
    total_bytes: Option<u64>,
}

/// Per-attempt bookkeeping; every emitted event is derived from it.
struct DownloadSession<'a> {
    tool: ExternalToolId,
    url: &'a str,
    attempt: u32,
    downloaded_bytes: u64,
    total_bytes: Option<u64>,
    progress: ProgressSink<'a>,
    in_flight: &'a Mutex<InFlight>,
}

impl DownloadSession<'_> {
    fn emit(&self, phase: DownloadPhase) {
        *self.in_flight.lock() = InFlight {
            attempt: self.attempt,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
        };
        (self.progress)(DownloadEvent {
            tool: self.tool,
            url: self.url.to_string(),
            phase,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            attempt: self.attempt,
        });
    }
}

/// A fully transferred download. Dropping `path` deletes the file.
#[derive(Debug)]
pub struct DownloadedFile {
    pub path: TempPath,
    pub sha256: Sha256Digest,
    pub bytes: u64,
}

// ============================================================================
// Downloader
// ============================================================================

/// Streams URLs to temp files with retry and cancellation.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    temp_dir: PathBuf,
    retry: RetryPolicy,
    allow_insecure_http: bool,
    clock: Arc<dyn Clock>,
}

impl Downloader {
    /// Creates a downloader using the download timeout and retry policy
    /// from `config`.
    pub fn from_config(config: &ProvisionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            client: build_client(config.download_timeout())?,
            temp_dir: config.resolved_temp_dir(),
            retry: config.retry.clone(),
            allow_insecure_http: config.allow_insecure_http,
            clock,
        })
    }

    /// Downloads `url` for `tool` into a new temp file.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidUrl`] if the URL fails validation.
    /// - [`ProvisionError::HttpStatus`] on a non-success response (not retried).
    /// - [`ProvisionError::Network`] once retries are exhausted.
    /// - [`ProvisionError::Cancelled`] if `cancel` fires; a `Canceled` event
    ///   is emitted first.
    ///
    /// No temp file survives an error.
    pub async fn fetch(
        &self,
        tool: ExternalToolId,
        url: &str,
        progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<DownloadedFile> {
        validate_url(url, self.allow_insecure_http)?;
        info!(tool = %tool, "Downloading {} to {}", url, self.temp_dir.display());

        let in_flight = Mutex::new(InFlight::default());
        let result = retry_with(
            &self.retry,
            self.clock.as_ref(),
            cancel,
            |attempt, _delay, _err| {
                DownloadSession {
                    tool,
                    url,
                    attempt,
                    downloaded_bytes: 0,
                    total_bytes: None,
                    progress,
                    in_flight: &in_flight,
                }
                .emit(DownloadPhase::Retry)
            },
            |attempt| self.fetch_once(tool, url, attempt, progress, &in_flight),
        )
        .await;

        if let Err(e) = &result {
            if e.is_cancelled() {
                // Reports where the interrupted attempt had got to.
                let last = *in_flight.lock();
                DownloadSession {
                    tool,
                    url,
                    attempt: last.attempt,
                    downloaded_bytes: last.downloaded_bytes,
                    total_bytes: last.total_bytes,
                    progress,
                    in_flight: &in_flight,
                }
                .emit(DownloadPhase::Canceled);
            }
        }

        result
    }

    async fn fetch_once(
        &self,
        tool: ExternalToolId,
        url: &str,
        attempt: u32,
        progress: ProgressSink<'_>,
        in_flight: &Mutex<InFlight>,
    ) -> Result<DownloadedFile> {
        *in_flight.lock() = InFlight {
            attempt,
            ..InFlight::default()
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProvisionError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut session = DownloadSession {
            tool,
            url,
            attempt,
            downloaded_bytes: 0,
            total_bytes: response.content_length(),
            progress,
            in_flight,
        };
        debug!("Content-Length: {:?}", session.total_bytes);

        let temp = tempfile::Builder::new()
            .prefix(&tool.temp_prefix())
            .tempfile_in(&self.temp_dir)
            .map_err(|e| ProvisionError::fs("failed to create download temp file", e))?;
        let (std_file, path) = temp.into_parts();
        let mut file = File::from_std(std_file);

        session.emit(DownloadPhase::Start);

        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProvisionError::network(url, e))?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(|e| {
                ProvisionError::fs(format!("failed to write {}", path.display()), e)
            })?;
            session.downloaded_bytes += chunk.len() as u64;
            session.emit(DownloadPhase::Downloading);
        }

        file.flush()
            .await
            .map_err(|e| ProvisionError::fs(format!("failed to flush {}", path.display()), e))?;
        drop(file);

        let sha256 = Sha256Digest::from_output(&hasher.finalize());
        session.emit(DownloadPhase::Done);

        info!(
            "Download complete: {} bytes written to {}",
            session.downloaded_bytes,
            path.display()
        );

        Ok(DownloadedFile {
            path,
            sha256,
            bytes: session.downloaded_bytes,
        })
    }
}
