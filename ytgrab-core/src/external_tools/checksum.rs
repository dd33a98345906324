//! Expected-digest resolution.
//!
//! Precedence for a tool: a pinned digest override, then the manifest URL
//! override, then the tool's default manifest candidates. Manifests are
//! matched against three line shapes only:
//!
//! - `<hex>  <name>` (GNU coreutils text mode)
//! - `<hex> *<name>` (GNU coreutils binary mode)
//! - `SHA256 (<name>) = <hex>` (BSD tag format)
//!
//! A manifest whose only non-empty line carries a single digest is accepted
//! for any target. That fallback is permissive and is not extended further.

use std::fmt;
use std::sync::LazyLock;

use futures::StreamExt;
use regex::Regex;
use sha2::digest::Output;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::downloader::validate_url;
use super::types::{ChecksumSource, ToolSpec};
use crate::config::ToolOverrides;
use crate::error::{ProvisionError, Result};

/// Upper bound on manifest text read from the network.
pub const MAX_MANIFEST_BYTES: usize = 1 << 20;

/// BtbN publishes a combined manifest next to its latest-release assets.
const BTBN_LATEST_PREFIX: &str = "https://github.com/BtbN/FFmpeg-Builds/releases/latest/download/";

static DIGEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-f0-9]{64}\b").expect("valid digest regex"));

static GNU_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([a-f0-9]{64})(?:  | \*)(.+)$").expect("valid GNU manifest regex")
});

static BSD_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^SHA256 \((.+)\) = (?i)([a-f0-9]{64})$").expect("valid BSD manifest regex")
});

// ============================================================================
// Digest
// ============================================================================

/// A SHA-256 digest as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parses a digest, trimming whitespace and lowercasing.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidDigest`] unless the input is exactly
    /// 64 hex characters.
    pub fn parse(input: &str) -> Result<Self> {
        let digest = input.trim().to_ascii_lowercase();
        if digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(digest))
        } else {
            Err(ProvisionError::InvalidDigest(input.to_string()))
        }
    }

    /// Builds a digest from a finalized hasher output.
    pub fn from_output(output: &Output<Sha256>) -> Self {
        Self(output.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Manifest Parsing
// ============================================================================

/// Lowercased last path segment, splitting on either separator.
fn base_name(name: &str) -> String {
    name.trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Returns the base name of a URL's path, used as the manifest lookup key.
pub fn checksum_target_name(source_url: &str) -> String {
    match url::Url::parse(source_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .unwrap_or_default(),
        Err(_) => source_url.rsplit('/').next().unwrap_or_default().to_string(),
    }
}

/// Finds the digest for `target` in manifest text.
pub fn find_in_manifest(text: &str, target: &str) -> Option<Sha256Digest> {
    let wanted = base_name(target);
    if wanted.is_empty() {
        return None;
    }

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    for line in &lines {
        let (digest, name) = if let Some(caps) = GNU_LINE_RE.captures(line) {
            (caps[1].to_string(), caps[2].to_string())
        } else if let Some(caps) = BSD_LINE_RE.captures(line) {
            (caps[2].to_string(), caps[1].to_string())
        } else {
            continue;
        };

        if base_name(&name) == wanted {
            return Sha256Digest::parse(&digest).ok();
        }
    }

    if let [only] = lines.as_slice() {
        let mut digests = DIGEST_RE.find_iter(only);
        if let (Some(first), None) = (digests.next(), digests.next()) {
            debug!("Manifest has a single unlabeled digest, accepting it");
            return Sha256Digest::parse(first.as_str()).ok();
        }
    }

    None
}

// ============================================================================
// Candidate Selection
// ============================================================================

/// Manifest URLs to try, in order, plus the name to look up in them.
pub fn manifest_candidates(
    spec: &ToolSpec,
    overrides: &ToolOverrides,
    source_url: &str,
) -> (Vec<String>, String) {
    let mut candidates = Vec::new();
    if let Some(url) = &overrides.sha256_url {
        candidates.push(url.clone());
    }

    let target = match spec.checksum {
        ChecksumSource::ReleaseManifest { url, target } => {
            candidates.push(url.to_string());
            target.to_string()
        }
        ChecksumSource::SiblingManifests => {
            if source_url.starts_with(BTBN_LATEST_PREFIX) {
                candidates.push(format!("{BTBN_LATEST_PREFIX}checksums.sha256"));
            }
            candidates.push(format!("{source_url}.sha256"));
            candidates.push(format!("{source_url}.sha256.txt"));
            checksum_target_name(source_url)
        }
    };

    (candidates, target)
}

// ============================================================================
// Resolver
// ============================================================================

/// Fetches manifests and resolves expected digests.
#[derive(Debug, Clone)]
pub struct ChecksumResolver {
    client: reqwest::Client,
    allow_insecure_http: bool,
}

impl ChecksumResolver {
    pub fn new(client: reqwest::Client, allow_insecure_http: bool) -> Self {
        Self {
            client,
            allow_insecure_http,
        }
    }

    /// Resolves the expected digest for `spec` downloading from `source_url`.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidDigest`] if a pinned override is malformed.
    /// - [`ProvisionError::ChecksumResolution`] if no candidate yields a digest.
    /// - [`ProvisionError::Cancelled`] if `cancel` fires during a lookup.
    pub async fn resolve(
        &self,
        spec: &ToolSpec,
        overrides: &ToolOverrides,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Sha256Digest> {
        if let Some(pinned) = &overrides.sha256 {
            debug!(tool = %spec.id, "Using pinned sha256 override");
            return Sha256Digest::parse(pinned);
        }

        let (candidates, target) = manifest_candidates(spec, overrides, source_url);
        let mut last_failure = String::from("no checksum candidates configured");

        for candidate in &candidates {
            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
                text = self.fetch_manifest(candidate) => text,
            };

            match text {
                Ok(text) => match find_in_manifest(&text, &target) {
                    Some(digest) => {
                        debug!(%candidate, %digest, "Resolved sha256 for {}", target);
                        return Ok(digest);
                    }
                    None => {
                        debug!(%candidate, "No sha256 for {} in manifest", target);
                        last_failure = format!("no sha256 for {target} in {candidate}");
                    }
                },
                Err(e) => {
                    warn!(%candidate, error = %e, "Checksum manifest candidate failed");
                    last_failure = e.to_string();
                }
            }
        }

        Err(ProvisionError::ChecksumResolution {
            target,
            reason: last_failure,
        })
    }

    /// Fetches manifest text, reading at most [`MAX_MANIFEST_BYTES`].
    async fn fetch_manifest(&self, url: &str) -> Result<String> {
        validate_url(url, self.allow_insecure_http)?;

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

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProvisionError::network(url, e))?;
            let room = MAX_MANIFEST_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_MANIFEST_BYTES {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_tools::catalog::tool_spec;
    use crate::external_tools::types::ExternalToolId;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HEX_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HEX_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn resolver() -> ChecksumResolver {
        ChecksumResolver::new(reqwest::Client::new(), true)
    }

    fn sibling_spec() -> ToolSpec {
        ToolSpec {
            id: ExternalToolId::Ffmpeg,
            display_name: "FFmpeg",
            default_source_url: "https://example.com/ffmpeg.zip",
            checksum: ChecksumSource::SiblingManifests,
            archive_entry: None,
        }
    }

    #[test]
    fn test_digest_parse_normalizes() {
        let digest = Sha256Digest::parse(&format!("  {}\n", HEX_A.to_uppercase())).unwrap();
        assert_eq!(digest.as_str(), HEX_A);
    }

    #[test]
    fn test_digest_parse_rejects_malformed() {
        assert!(Sha256Digest::parse("abc").is_err());
        assert!(Sha256Digest::parse(&"g".repeat(64)).is_err());
        assert!(Sha256Digest::parse(&"a".repeat(65)).is_err());
        assert!(Sha256Digest::parse("").is_err());
    }

    #[test]
    fn test_gnu_text_mode_line() {
        let text = format!("{HEX_A}  yt-dlp.exe\n");
        assert_eq!(find_in_manifest(&text, "yt-dlp.exe").unwrap().as_str(), HEX_A);
    }

    #[test]
    fn test_gnu_binary_mode_line() {
        let text = format!("{HEX_B} *other.zip\n{HEX_A} *ffmpeg-win64.zip\n");
        assert_eq!(
            find_in_manifest(&text, "ffmpeg-win64.zip").unwrap().as_str(),
            HEX_A
        );
    }

    #[test]
    fn test_bsd_tag_line() {
        let text = format!("SHA256 (yt-dlp) = {HEX_B}\nSHA256 (yt-dlp.exe) = {HEX_A}\n");
        assert_eq!(find_in_manifest(&text, "yt-dlp.exe").unwrap().as_str(), HEX_A);
    }

    #[test]
    fn test_name_match_is_case_insensitive_by_base_name() {
        let text = format!("{HEX_B}  yt-dlp\n{HEX_A}  dist/YT-DLP.EXE\n");
        assert_eq!(find_in_manifest(&text, "yt-dlp.exe").unwrap().as_str(), HEX_A);

        let text = format!("{HEX_A}  builds\\win64\\ffmpeg.zip\n");
        assert_eq!(find_in_manifest(&text, "FFMPEG.ZIP").unwrap().as_str(), HEX_A);
    }

    #[test]
    fn test_uppercase_digest_is_normalized() {
        let text = format!("{}  yt-dlp.exe\n", HEX_A.to_uppercase());
        assert_eq!(find_in_manifest(&text, "yt-dlp.exe").unwrap().as_str(), HEX_A);
    }

    #[test]
    fn test_single_unlabeled_digest_fallback() {
        assert_eq!(
            find_in_manifest(&format!("{HEX_A}\n\n"), "ffmpeg.zip")
                .unwrap()
                .as_str(),
            HEX_A
        );
    }

    #[test]
    fn test_fallback_requires_exactly_one_line() {
        let text = format!("{HEX_A}  one.zip\n{HEX_B}  two.zip\n");
        assert!(find_in_manifest(&text, "ffmpeg.zip").is_none());
    }

    #[test]
    fn test_fallback_rejects_two_digests_on_one_line() {
        let text = format!("{HEX_A} {HEX_B}\n");
        assert!(find_in_manifest(&text, "ffmpeg.zip").is_none());
    }

    #[test]
    fn test_single_space_separator_is_not_a_known_shape() {
        let text = format!("{HEX_A} yt-dlp.exe\n{HEX_B}  other\n");
        assert!(find_in_manifest(&text, "yt-dlp.exe").is_none());
    }

    #[test]
    fn test_checksum_target_name() {
        assert_eq!(
            checksum_target_name("https://example.com/builds/ffmpeg-release.zip?x=1"),
            "ffmpeg-release.zip"
        );
        assert_eq!(checksum_target_name("not a url/file.zip"), "file.zip");
    }

    #[test]
    fn test_candidates_for_release_manifest() {
        let spec = tool_spec(ExternalToolId::YtDlp);
        let overrides = ToolOverrides {
            sha256_url: Some("https://mirror.example.com/SUMS".to_string()),
            ..Default::default()
        };
        let (candidates, target) =
            manifest_candidates(spec, &overrides, spec.default_source_url);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0], "https://mirror.example.com/SUMS");
        assert!(candidates[1].ends_with("/SHA2-256SUMS"));
        assert_eq!(target, "yt-dlp.exe");
    }

    #[test]
    fn test_candidates_for_btbn_source() {
        let source = format!("{BTBN_LATEST_PREFIX}ffmpeg-master-latest-win64-gpl.zip");
        let (candidates, target) =
            manifest_candidates(&sibling_spec(), &ToolOverrides::default(), &source);
        assert_eq!(
            candidates,
            vec![
                format!("{BTBN_LATEST_PREFIX}checksums.sha256"),
                format!("{source}.sha256"),
                format!("{source}.sha256.txt"),
            ]
        );
        assert_eq!(target, "ffmpeg-master-latest-win64-gpl.zip");
    }

    #[tokio::test]
    async fn test_pinned_override_skips_network() {
        let overrides = ToolOverrides {
            sha256: Some(HEX_A.to_uppercase()),
            sha256_url: Some("http://127.0.0.1:9/never".to_string()),
            ..Default::default()
        };
        let digest = resolver()
            .resolve(
                &sibling_spec(),
                &overrides,
                "https://example.com/ffmpeg.zip",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(digest.as_str(), HEX_A);
    }

    #[tokio::test]
    async fn test_malformed_pinned_override_fails() {
        let overrides = ToolOverrides {
            sha256: Some("nope".to_string()),
            ..Default::default()
        };
        let err = resolver()
            .resolve(
                &sibling_spec(),
                &overrides,
                "https://example.com/ffmpeg.zip",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidDigest(_)));
    }

    #[tokio::test]
    async fn test_failed_candidate_advances_to_next() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ffmpeg.zip.sha256"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ffmpeg.zip.sha256.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{HEX_A} *ffmpeg.zip\n")))
            .mount(&server)
            .await;

        let source = format!("{}/ffmpeg.zip", server.uri());
        let digest = resolver()
            .resolve(
                &sibling_spec(),
                &ToolOverrides::default(),
                &source,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(digest.as_str(), HEX_A);
    }

    #[tokio::test]
    async fn test_exhausted_candidates_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("nothing useful here\nat all\n"))
            .mount(&server)
            .await;

        let source = format!("{}/ffmpeg.zip", server.uri());
        let err = resolver()
            .resolve(
                &sibling_spec(),
                &ToolOverrides::default(),
                &source,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            ProvisionError::ChecksumResolution { target, .. } => assert_eq!(target, "ffmpeg.zip"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_manifest_body_is_capped() {
        let server = MockServer::start().await;
        let mut body = "x".repeat(MAX_MANIFEST_BYTES);
        body.push_str(&format!("\n{HEX_A}  ffmpeg.zip\n"));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let text = resolver()
            .fetch_manifest(&format!("{}/SUMS", server.uri()))
            .await
            .unwrap();
        assert_eq!(text.len(), MAX_MANIFEST_BYTES);
        assert!(find_in_manifest(&text, "ffmpeg.zip").is_none());
    }
}
