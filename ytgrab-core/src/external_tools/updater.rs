//! yt-dlp self-update check.
//!
//! Compares the installed binary's `--version` output with the latest release
//! tag and re-provisions the binary when they differ. The replacement goes
//! through the same checksum resolution and atomic install as a first-time
//! install.

use std::path::Path;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::downloader::{build_client, validate_url, ProgressSink};
use super::manager::ToolProvisioner;
use super::types::ExternalToolId;
use crate::error::{ProvisionError, Result};
use crate::process::background_command;

#[derive(Debug, Deserialize)]
struct LatestRelease {
    #[serde(default)]
    tag_name: String,
}

/// Strips surrounding whitespace and a leading `v`.
pub fn normalize_version(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed)
}

/// Returns true when both versions are known and differ.
pub fn needs_update(local: &str, latest: &str) -> bool {
    let local = normalize_version(local);
    let latest = normalize_version(latest);
    !local.is_empty() && !latest.is_empty() && local != latest
}

/// Checks for and applies yt-dlp updates.
pub struct UpdateChecker<'a> {
    provisioner: &'a ToolProvisioner,
    client: reqwest::Client,
}

impl<'a> UpdateChecker<'a> {
    pub fn new(provisioner: &'a ToolProvisioner) -> Result<Self> {
        Ok(Self {
            provisioner,
            client: build_client(provisioner.config().api_timeout())?,
        })
    }

    /// Runs the installed tool with `--version` and returns its trimmed output.
    pub async fn local_version(&self, installed: &Path) -> Result<String> {
        let output = background_command(installed)
            .arg("--version")
            .output()
            .await
            .map_err(|source| ProvisionError::Spawn {
                path: installed.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProvisionError::Spawn {
                path: installed.to_path_buf(),
                source: std::io::Error::other(format!("exited with {}", output.status)),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Queries the release endpoint for the latest tag.
    pub async fn latest_version(&self) -> Result<String> {
        let url = self.provisioner.config().release_api_url.as_str();
        validate_url(url, self.provisioner.config().allow_insecure_http)?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
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

        let release: LatestRelease = response
            .json()
            .await
            .map_err(|e| ProvisionError::ReleaseLookup(e.to_string()))?;

        let tag = release.tag_name.trim();
        if tag.is_empty() {
            return Err(ProvisionError::ReleaseLookup(
                "release response missing tag_name".to_string(),
            ));
        }
        Ok(tag.to_string())
    }

    /// Updates the yt-dlp binary at `installed` if a newer release exists.
    ///
    /// Every outcome is narrated through `log`. Returns `Ok(true)` when the
    /// binary was replaced.
    ///
    /// # Errors
    ///
    /// The failure that stopped the check, after it has been narrated.
    /// Cancellation is returned without narration.
    pub async fn check(
        &self,
        installed: &Path,
        log: &(dyn Fn(&str) + Send + Sync),
        progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let local = self.local_version(installed).await.inspect_err(|e| {
            log(&format!("Could not read local yt-dlp version: {e}"));
        })?;

        let latest = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
            latest = self.latest_version() => latest,
        };
        let latest = latest
            .inspect_err(|e| log(&format!("Could not check latest yt-dlp version: {e}")))?;

        if !needs_update(&local, &latest) {
            debug!(%local, %latest, "No update needed");
            log(&format!("yt-dlp is up to date ({local})."));
            return Ok(false);
        }

        log(&format!("Updating yt-dlp from {local} to {latest}..."));
        info!(%local, %latest, "Updating yt-dlp");

        if let Err(e) = self
            .provisioner
            .reinstall(ExternalToolId::YtDlp, installed, progress, cancel)
            .await
        {
            if !e.is_cancelled() {
                log(&format!("yt-dlp update failed: {e}"));
            }
            return Err(e);
        }

        log("yt-dlp update complete.");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version(" v2024.03.10\n"), "2024.03.10");
        assert_eq!(normalize_version("2024.03.10"), "2024.03.10");
        assert_eq!(normalize_version("   "), "");
    }

    #[test]
    fn test_needs_update() {
        assert!(needs_update("2024.03.10", "2024.04.09"));
        assert!(!needs_update("2024.03.10", "v2024.03.10"));
        assert!(!needs_update(" v2024.03.10 ", "2024.03.10\n"));
        assert!(!needs_update("", "2024.04.09"));
        assert!(!needs_update("2024.03.10", ""));
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use crate::config::ProvisionConfig;
        use crate::external_tools::checksum::Sha256Digest;
        use crate::external_tools::downloader::no_progress;
        use parking_lot::Mutex;
        use sha2::{Digest, Sha256};
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        struct Setup {
            _cache: TempDir,
            _temp: TempDir,
            provisioner: ToolProvisioner,
            installed: std::path::PathBuf,
        }

        fn setup(server: &MockServer, local_version: &str, pinned: Option<&str>) -> Setup {
            let cache = TempDir::new().unwrap();
            let temp = TempDir::new().unwrap();
            let config = ProvisionConfig {
                cache_dir: Some(cache.path().to_path_buf()),
                temp_dir: Some(temp.path().to_path_buf()),
                allow_insecure_http: true,
                release_api_url: format!("{}/releases/latest", server.uri()),
                ytdlp: crate::config::ToolOverrides {
                    source_url: Some(format!("{}/yt-dlp.exe", server.uri())),
                    sha256_url: Some(format!("{}/SUMS", server.uri())),
                    sha256: pinned.map(str::to_string),
                },
                ..Default::default()
            };
            let provisioner = ToolProvisioner::new(config).unwrap();

            let installed = provisioner.binary_path(ExternalToolId::YtDlp);
            std::fs::write(&installed, format!("#!/bin/sh\necho {local_version}\n")).unwrap();
            std::fs::set_permissions(&installed, std::fs::Permissions::from_mode(0o755)).unwrap();

            Setup {
                _cache: cache,
                _temp: temp,
                provisioner,
                installed,
            }
        }

        async fn mock_release(server: &MockServer, tag: &str) {
            Mock::given(method("GET"))
                .and(path("/releases/latest"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({ "tag_name": tag })),
                )
                .mount(server)
                .await;
        }

        #[tokio::test]
        async fn test_up_to_date_makes_no_download() {
            let server = MockServer::start().await;
            mock_release(&server, "v2024.03.10").await;
            let setup = setup(&server, "2024.03.10", None);
            let checker = UpdateChecker::new(&setup.provisioner).unwrap();
            let lines = Mutex::new(Vec::new());
            let log = |line: &str| lines.lock().push(line.to_string());

            let updated = checker
                .check(&setup.installed, &log, &no_progress, &CancellationToken::new())
                .await
                .unwrap();

            assert!(!updated);
            assert_eq!(
                lines.into_inner(),
                vec!["yt-dlp is up to date (2024.03.10).".to_string()]
            );
            assert_eq!(server.received_requests().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_newer_release_replaces_binary() {
            let server = MockServer::start().await;
            mock_release(&server, "2024.04.09").await;
            let new_binary = b"MZ yt-dlp 2024.04.09".to_vec();
            let digest = Sha256Digest::from_output(&Sha256::digest(&new_binary));
            Mock::given(method("GET"))
                .and(path("/SUMS"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_string(format!("{digest}  yt-dlp.exe\n")),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/yt-dlp.exe"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(new_binary.clone()))
                .mount(&server)
                .await;

            let setup = setup(&server, "2024.03.10", None);
            let checker = UpdateChecker::new(&setup.provisioner).unwrap();
            let lines = Mutex::new(Vec::new());
            let log = |line: &str| lines.lock().push(line.to_string());

            let updated = checker
                .check(&setup.installed, &log, &no_progress, &CancellationToken::new())
                .await
                .unwrap();

            assert!(updated);
            assert_eq!(std::fs::read(&setup.installed).unwrap(), new_binary);
            assert_eq!(
                lines.into_inner(),
                vec![
                    "Updating yt-dlp from 2024.03.10 to 2024.04.09...".to_string(),
                    "yt-dlp update complete.".to_string(),
                ]
            );
        }

        #[tokio::test]
        async fn test_failed_update_is_narrated_and_keeps_binary() {
            let server = MockServer::start().await;
            mock_release(&server, "2024.04.09").await;
            Mock::given(method("GET"))
                .and(path("/yt-dlp.exe"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"MZ tampered".to_vec()))
                .mount(&server)
                .await;

            let pinned = "0".repeat(64);
            let setup = setup(&server, "2024.03.10", Some(&pinned));
            let before = std::fs::read(&setup.installed).unwrap();
            let checker = UpdateChecker::new(&setup.provisioner).unwrap();
            let lines = Mutex::new(Vec::new());
            let log = |line: &str| lines.lock().push(line.to_string());

            let err = checker
                .check(&setup.installed, &log, &no_progress, &CancellationToken::new())
                .await
                .unwrap_err();

            assert!(matches!(err, ProvisionError::ChecksumMismatch { .. }));
            let lines = lines.into_inner();
            assert_eq!(lines.len(), 2);
            assert!(lines[1].starts_with("yt-dlp update failed:"));
            assert_eq!(std::fs::read(&setup.installed).unwrap(), before);
        }

        #[tokio::test]
        async fn test_release_lookup_failure_is_narrated() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/releases/latest"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
                .mount(&server)
                .await;

            let setup = setup(&server, "2024.03.10", None);
            let checker = UpdateChecker::new(&setup.provisioner).unwrap();
            let lines = Mutex::new(Vec::new());
            let log = |line: &str| lines.lock().push(line.to_string());

            let err = checker
                .check(&setup.installed, &log, &no_progress, &CancellationToken::new())
                .await
                .unwrap_err();

            assert!(matches!(err, ProvisionError::ReleaseLookup(_)));
            let lines = lines.into_inner();
            assert_eq!(lines.len(), 1);
            assert!(lines[0].starts_with("Could not check latest yt-dlp version:"));
        }

        #[tokio::test]
        async fn test_unreadable_local_version_is_narrated() {
            let server = MockServer::start().await;
            let setup = setup(&server, "unused", None);
            std::fs::remove_file(&setup.installed).unwrap();
            let checker = UpdateChecker::new(&setup.provisioner).unwrap();
            let lines = Mutex::new(Vec::new());
            let log = |line: &str| lines.lock().push(line.to_string());

            let err = checker
                .check(&setup.installed, &log, &no_progress, &CancellationToken::new())
                .await
                .unwrap_err();

            assert!(matches!(err, ProvisionError::Spawn { .. }));
            assert!(lines.lock()[0].starts_with("Could not read local yt-dlp version:"));
            assert!(server.received_requests().await.unwrap().is_empty());
        }
    }
}
