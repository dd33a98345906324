//! Provisioning settings for ytgrab.
//!
//! Settings come from three layers, later ones winning: built-in defaults, an
//! optional JSON file, and `YTGRAB_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProvisionError, Result};
use crate::external_tools::retry::RetryPolicy;
use crate::external_tools::types::ExternalToolId;

// =============================================================================
// Defaults
// =============================================================================

/// Application directory name under the OS cache directory.
pub const APP_DIR_NAME: &str = "ytgrab";

/// Endpoint reporting the latest yt-dlp release tag.
pub const DEFAULT_RELEASE_API_URL: &str =
    "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_API_TIMEOUT_SECS: u64 = 15;

/// Environment variable prefix for every override.
const ENV_PREFIX: &str = "YTGRAB";

// =============================================================================
// Per-tool Overrides
// =============================================================================

/// Source and checksum overrides for a single tool.
///
/// Environment mapping, with `<TOOL>` being `YTDLP` or `FFMPEG`:
///   - `YTGRAB_<TOOL>_URL` replaces the default binary/archive source
///   - `YTGRAB_<TOOL>_SHA256` pins the digest and skips manifest lookup
///   - `YTGRAB_<TOOL>_SHA256_URL` is tried before the default manifests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverrides {
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub sha256_url: Option<String>,
}

impl ToolOverrides {
    fn apply_env(&mut self, tool: ExternalToolId) {
        let key = tool.env_key();
        if let Some(v) = env_value(&format!("{ENV_PREFIX}_{key}_URL")) {
            self.source_url = Some(v);
        }
        if let Some(v) = env_value(&format!("{ENV_PREFIX}_{key}_SHA256")) {
            self.sha256 = Some(v);
        }
        if let Some(v) = env_value(&format!("{ENV_PREFIX}_{key}_SHA256_URL")) {
            self.sha256_url = Some(v);
        }
    }

    /// Drops blank values so callers only see meaningful overrides.
    fn normalize(&mut self) {
        for field in [&mut self.source_url, &mut self.sha256, &mut self.sha256_url] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            } else if let Some(v) = field.as_mut() {
                *v = v.trim().to_string();
            }
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Provisioning Config
// =============================================================================

/// Settings for the provisioning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Where installed tools live. Defaults to `{cache}/ytgrab`.
    pub cache_dir: Option<PathBuf>,

    /// Where transient downloads are staged. Defaults to the OS temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Per-attempt timeout for binary downloads.
    pub download_timeout_secs: u64,

    /// Timeout for checksum manifest lookups.
    pub lookup_timeout_secs: u64,

    /// Timeout for the latest-release query.
    pub api_timeout_secs: u64,

    /// Retry policy for transient download failures.
    pub retry: RetryPolicy,

    /// Permit plain `http://` sources (local mirrors and tests).
    pub allow_insecure_http: bool,

    /// Latest-release endpoint used by the update checker.
    pub release_api_url: String,

    pub ytdlp: ToolOverrides,
    pub ffmpeg: ToolOverrides,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            temp_dir: None,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            lookup_timeout_secs: DEFAULT_LOOKUP_TIMEOUT_SECS,
            api_timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            allow_insecure_http: false,
            release_api_url: DEFAULT_RELEASE_API_URL.to_string(),
            ytdlp: ToolOverrides::default(),
            ffmpeg: ToolOverrides::default(),
        }
    }
}

impl ProvisionConfig {
    /// Loads defaults, then the optional JSON file, then the environment.
    ///
    /// A file that fails to parse is reported and ignored; a file that
    /// cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate();
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::fs(format!("failed to read config {}", path.display()), e)
        })?;

        match serde_json::from_str::<ProvisionConfig>(&content) {
            Ok(config) => {
                debug!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse {}, using defaults", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Applies `YTGRAB_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(dir) = env_value(&format!("{ENV_PREFIX}_CACHE_DIR")) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) =
            env_value(&format!("{ENV_PREFIX}_HTTP_TIMEOUT")).and_then(|s| s.parse().ok())
        {
            self.lookup_timeout_secs = secs;
            self.api_timeout_secs = secs;
        }
        self.ytdlp.apply_env(ExternalToolId::YtDlp);
        self.ffmpeg.apply_env(ExternalToolId::Ffmpeg);
    }

    /// Clamps settings to usable ranges.
    pub fn validate(&mut self) {
        self.download_timeout_secs = self.download_timeout_secs.clamp(5, 4 * 60 * 60);
        self.lookup_timeout_secs = self.lookup_timeout_secs.clamp(1, 300);
        self.api_timeout_secs = self.api_timeout_secs.clamp(1, 300);
        self.retry.validate();

        if self.release_api_url.trim().is_empty() {
            self.release_api_url = DEFAULT_RELEASE_API_URL.to_string();
        }

        self.ytdlp.normalize();
        self.ffmpeg.normalize();
    }

    /// Returns the overrides for a tool.
    pub fn overrides(&self, tool: ExternalToolId) -> &ToolOverrides {
        match tool {
            ExternalToolId::YtDlp => &self.ytdlp,
            ExternalToolId::Ffmpeg => &self.ffmpeg,
        }
    }

    /// Resolves the cache directory, falling back to the OS cache location.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or_else(|| {
                ProvisionError::fs(
                    "could not resolve cache dir",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no OS cache directory"),
                )
            })
    }

    /// Resolves the staging directory for transient downloads.
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}
