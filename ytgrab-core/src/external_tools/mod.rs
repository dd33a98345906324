//! External tool provisioning for yt-dlp and FFmpeg.
//!
//! Tools are downloaded on demand into the per-application cache directory.
//! Nothing is installed unless its SHA-256 matched a digest resolved from an
//! override or a release manifest.
//!
//! # Architecture
//!
//! - `types`: Core types (ExternalToolId, ToolSpec, ChecksumSource)
//! - `catalog`: Static tool definitions with download URLs
//! - `paths`: Cache layout and the download-temp sweep
//! - `checksum`: Expected-digest resolution from overrides and manifests
//! - `sniff`: Payload classification by magic bytes
//! - `extractor`: Single-entry zip extraction
//! - `retry`: Backoff state machine and injectable clock
//! - `downloader`: Streaming download with progress events
//! - `installer`: Atomic staging-sibling install
//! - `manager`: `ToolProvisioner`, the high-level API
//! - `updater`: yt-dlp version check and self-update
//!
//! # Example
//!
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//! use ytgrab_core::config::ProvisionConfig;
//! use ytgrab_core::external_tools::{EmbeddedAssets, ToolProvisioner};
//!
//! let provisioner = ToolProvisioner::new(ProvisionConfig::load(None)?)?;
//! let tools = provisioner
//!     .ensure_all(&EmbeddedAssets::default(), &|event| {
//!         if let Some(percent) = event.percent() {
//!             println!("{} {:.1}%", event.tool, percent);
//!         }
//!     }, &CancellationToken::new())
//!     .await?;
//! println!("yt-dlp at {}", tools.ytdlp.display());
//! ```

pub mod catalog;
pub mod checksum;
pub mod downloader;
pub mod extractor;
pub mod installer;
pub mod manager;
pub mod paths;
pub mod retry;
pub mod sniff;
pub mod types;
pub mod updater;

// Re-export commonly used types
pub use catalog::{all_tool_specs, tool_spec};
pub use checksum::{find_in_manifest, ChecksumResolver, Sha256Digest};
pub use downloader::{no_progress, DownloadEvent, DownloadPhase, ProgressSink};
pub use manager::{EmbeddedAssets, ProvisionedTools, ToolProvisioner};
pub use paths::{cleanup_download_temps, cleanup_download_temps_in};
pub use retry::{Clock, RetryPolicy, RetryState, TokioClock};
pub use sniff::{classify, PayloadKind};
pub use types::{ExternalToolId, ToolSpec};
pub use updater::{needs_update, UpdateChecker};
