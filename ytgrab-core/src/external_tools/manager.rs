//! Tool provisioner coordinating checksum lookup, download, and install.
//!
//! The `ToolProvisioner` is the main entry point for getting a verified tool
//! onto disk. It composes the catalog, checksum resolver, downloader, format
//! sniffer, extractor, and installer into [`ToolProvisioner::ensure`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::catalog::tool_spec;
use super::checksum::ChecksumResolver;
use super::downloader::{build_client, DownloadEvent, DownloadPhase, Downloader, ProgressSink};
use super::extractor::extract_entry;
use super::installer::install;
use super::paths;
use super::retry::{Clock, TokioClock};
use super::sniff::{classify, PayloadKind};
use super::types::{ArchiveEntry, ExternalToolId};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};

// ============================================================================
// Provisioning Inputs and Results
// ============================================================================

/// Build-time-trusted payloads that bypass the network when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets<'a> {
    pub ytdlp: Option<&'a [u8]>,
    pub ffmpeg: Option<&'a [u8]>,
}

impl<'a> EmbeddedAssets<'a> {
    pub fn get(&self, tool: ExternalToolId) -> Option<&'a [u8]> {
        match tool {
            ExternalToolId::YtDlp => self.ytdlp,
            ExternalToolId::Ffmpeg => self.ffmpeg,
        }
    }
}

/// Where the tools ended up, handed to whatever runs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTools {
    pub ytdlp: PathBuf,
    pub ffmpeg: PathBuf,
    /// Tools installed by this call rather than found on disk.
    pub freshly_installed: Vec<ExternalToolId>,
}

impl ProvisionedTools {
    /// Returns true if `tool` was installed by the call that produced this.
    pub fn was_installed(&self, tool: ExternalToolId) -> bool {
        self.freshly_installed.contains(&tool)
    }

    /// Directory holding ffmpeg, as passed to `--ffmpeg-location`.
    pub fn ffmpeg_dir(&self) -> &Path {
        self.ffmpeg.parent().unwrap_or(Path::new("."))
    }
}

// ============================================================================
// Tool Provisioner
// ============================================================================

/// Installs verified tools into the cache directory.
///
/// Concurrent `ensure` calls on one provisioner are serialized internally.
#[derive(Debug)]
pub struct ToolProvisioner {
    cache_dir: PathBuf,
    temp_dir: PathBuf,
    config: ProvisionConfig,
    downloader: Downloader,
    resolver: ChecksumResolver,
    install_lock: Mutex<()>,
}

impl ToolProvisioner {
    /// Creates a provisioner from validated settings.
    pub fn new(config: ProvisionConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Creates a provisioner whose backoff waits go through `clock`.
    pub fn with_clock(config: ProvisionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let cache_dir = config.resolved_cache_dir()?;
        let temp_dir = config.resolved_temp_dir();
        let downloader = Downloader::from_config(&config, clock)?;
        let resolver = ChecksumResolver::new(
            build_client(config.lookup_timeout())?,
            config.allow_insecure_http,
        );

        info!(
            "ToolProvisioner initialized. Cache dir: {}, temp dir: {}",
            cache_dir.display(),
            temp_dir.display()
        );

        Ok(Self {
            cache_dir,
            temp_dir,
            config,
            downloader,
            resolver,
            install_lock: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    // ========================================================================
    // Tool Queries
    // ========================================================================

    /// Returns where `tool` is (or would be) installed.
    pub fn binary_path(&self, tool: ExternalToolId) -> PathBuf {
        paths::tool_path(&self.cache_dir, tool)
    }

    /// Returns true if `tool` is installed.
    pub fn binary_exists(&self, tool: ExternalToolId) -> bool {
        self.binary_path(tool).is_file()
    }

    /// Lists tools that are not installed yet.
    pub fn missing_tools(&self) -> Vec<ExternalToolId> {
        ExternalToolId::all()
            .iter()
            .copied()
            .filter(|tool| !self.binary_exists(*tool))
            .collect()
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    /// Returns the installed path of `tool`, installing it first if missing.
    ///
    /// An existing install is returned without any network traffic.
    /// `embedded` bytes, when given, are installed as-is without checksum
    /// resolution. Otherwise the tool is downloaded, verified, classified,
    /// extracted if it arrived as a zip, and installed atomically.
    ///
    /// # Errors
    ///
    /// Any pipeline failure, wrapped with `could not download <tool>`.
    pub async fn ensure(
        &self,
        tool: ExternalToolId,
        embedded: Option<&[u8]>,
        progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.ensure_tracked(tool, embedded, progress, cancel)
            .await
            .map(|(path, _)| path)
    }

    /// Ensures both tools and reports which ones had to be installed.
    pub async fn ensure_all(
        &self,
        assets: &EmbeddedAssets<'_>,
        progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedTools> {
        let mut freshly_installed = Vec::new();

        let (ytdlp, installed) = self
            .ensure_tracked(ExternalToolId::YtDlp, assets.ytdlp, progress, cancel)
            .await?;
        if installed {
            freshly_installed.push(ExternalToolId::YtDlp);
        }

        let (ffmpeg, installed) = self
            .ensure_tracked(ExternalToolId::Ffmpeg, assets.ffmpeg, progress, cancel)
            .await?;
        if installed {
            freshly_installed.push(ExternalToolId::Ffmpeg);
        }

        Ok(ProvisionedTools {
            ytdlp,
            ffmpeg,
            freshly_installed,
        })
    }

    async fn ensure_tracked(
        &self,
        tool: ExternalToolId,
        embedded: Option<&[u8]>,
        progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, bool)> {
        let _guard = self.install_lock.lock().await;
        let target = self.binary_path(tool);

        if target.is_file() {
            debug!(tool = %tool, "Already installed at {}", target.display());
            return Ok((target, false));
        }

        paths::ensure_cache_dir(&self.cache_dir)?;

        let result = match embedded {
            Some(bytes) => self.install_embedded(tool, bytes, &target).await,
            None => self.provision_from_network(tool, &target, progress, cancel).await,
        };
        result.map_err(|e| e.context(format!("could not download {tool}")))?;

        info!(tool = %tool, "{} installed successfully", tool);
        Ok((target, true))
    }

    /// Downloads and installs a fresh copy of `tool` over `target`, even if
    /// one is already there.
    ///
    /// Runs under the same install lock as [`ensure`](Self::ensure), so a
    /// replacement never interleaves with a first-time install.
    ///
    /// # Errors
    ///
    /// Any pipeline failure. `target` keeps its previous content.
    pub async fn reinstall(
        &self,
        tool: ExternalToolId,
        target: &Path,
        progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
            guard = self.install_lock.lock() => guard,
        };
        self.provision_from_network(tool, target, progress, cancel).await
    }

    async fn install_embedded(&self, tool: ExternalToolId, bytes: &[u8], target: &Path) -> Result<()> {
        debug!(tool = %tool, "Installing {} embedded bytes", bytes.len());

        let temp = tempfile::Builder::new()
            .prefix(&tool.temp_prefix())
            .tempfile_in(&self.temp_dir)
            .map_err(|e| ProvisionError::fs("failed to create temp file", e))?
            .into_temp_path();
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| ProvisionError::fs(format!("failed to write {}", temp.display()), e))?;

        self.install_payload(target, temp).await
    }

    /// Downloads, verifies, and installs `tool` at `target`.
    ///
    /// `target` is replaced only after every check passed; on any error it
    /// keeps its previous content.
    async fn provision_from_network(
        &self,
        tool: ExternalToolId,
        target: &Path,
        progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let spec = tool_spec(tool);
        let overrides = self.config.overrides(tool);
        let source_url = spec.source_url(overrides.source_url.as_deref());

        info!(tool = %tool, "Installing {} from {}", spec.display_name, source_url);

        let expected = self
            .resolver
            .resolve(spec, overrides, source_url, cancel)
            .await?;
        let downloaded = self
            .downloader
            .fetch(tool, source_url, progress, cancel)
            .await?;

        if downloaded.sha256 != expected {
            return Err(ProvisionError::ChecksumMismatch {
                label: tool.file_name().to_string(),
                expected: expected.to_string(),
                actual: downloaded.sha256.to_string(),
            });
        }
        debug!("SHA256 verified: {}", expected);

        let payload = match classify(&downloaded.path)? {
            PayloadKind::Executable => downloaded.path,
            PayloadKind::ZipArchive => {
                let entry = spec.archive_entry.unwrap_or(ArchiveEntry {
                    base_name: tool.file_name(),
                    preferred_dir: "bin",
                });
                emit(progress, tool, source_url, DownloadPhase::ExtractStart);
                let result = self.extract(downloaded.path, entry, tool).await;
                emit(progress, tool, source_url, DownloadPhase::ExtractDone);
                result?
            }
            PayloadKind::Unknown => {
                return Err(ProvisionError::Format(format!(
                    "downloaded {tool} is neither an executable nor a zip archive"
                )))
            }
        };

        self.install_payload(target, payload).await
    }

    async fn extract(
        &self,
        archive: TempPath,
        entry: ArchiveEntry,
        tool: ExternalToolId,
    ) -> Result<TempPath> {
        let temp_dir = self.temp_dir.clone();
        let prefix = tool.temp_prefix();
        tokio::task::spawn_blocking(move || extract_entry(&archive, &entry, &temp_dir, &prefix))
            .await
            .map_err(|e| ProvisionError::fs("extraction task failed", std::io::Error::other(e)))?
    }

    async fn install_payload(&self, target: &Path, payload: TempPath) -> Result<()> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || install(&target, &payload))
            .await
            .map_err(|e| ProvisionError::fs("install task failed", std::io::Error::other(e)))?
    }
}

fn emit(progress: ProgressSink<'_>, tool: ExternalToolId, url: &str, phase: DownloadPhase) {
    progress(DownloadEvent {
        tool,
        url: url.to_string(),
        phase,
        downloaded_bytes: 0,
        total_bytes: None,
        attempt: 0,
    });
}
