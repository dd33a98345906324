//! Download session parameters and the yt-dlp invocation they imply.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// =============================================================================
// Choices
// =============================================================================

/// Requested quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    Best,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    AudioOnly,
}

impl Quality {
    pub fn all() -> &'static [Quality] {
        &[
            Self::Best,
            Self::P1080,
            Self::P720,
            Self::P480,
            Self::AudioOnly,
        ]
    }

    /// Height cap, if any.
    fn max_height(&self) -> Option<u32> {
        match self {
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::Best | Self::AudioOnly => None,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Best => "Best",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::AudioOnly => "Audio Only",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best" => Ok(Self::Best),
            "1080p" | "1080" => Ok(Self::P1080),
            "720p" | "720" => Ok(Self::P720),
            "480p" | "480" => Ok(Self::P480),
            "audio" | "audio only" | "audio-only" | "mp3" => Ok(Self::AudioOnly),
            _ => Err(format!("Unknown quality: {}", s)),
        }
    }
}

/// Codec/container trade-off for video downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputProfile {
    /// AV1/VP9 with Opus, merged into MKV.
    #[default]
    SmallerFiles,
    /// H.264 with AAC, merged into MP4.
    Compatibility,
}

impl OutputProfile {
    /// Container passed to `--merge-output-format`.
    pub fn merge_format(&self) -> &'static str {
        match self {
            Self::SmallerFiles => "mkv",
            Self::Compatibility => "mp4",
        }
    }
}

impl fmt::Display for OutputProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallerFiles => f.write_str("Smaller Files (AV1/VP9)"),
            Self::Compatibility => f.write_str("Compatibility (H.264/AAC)"),
        }
    }
}

impl std::str::FromStr for OutputProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smaller" | "small" | "av1" | "mkv" => Ok(Self::SmallerFiles),
            "compatibility" | "compat" | "h264" | "mp4" => Ok(Self::Compatibility),
            _ => Err(format!("Unknown output profile: {}", s)),
        }
    }
}

/// A subtitle track to download and embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleRequest {
    /// Language code as yt-dlp lists it (e.g. `en`, `en-US`).
    pub code: String,
    /// Auto-generated captions rather than uploaded subtitles.
    pub auto: bool,
}

// =============================================================================
// Session Plan
// =============================================================================

/// Static parameters of one download session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPlan {
    pub url: String,
    pub quality: Quality,
    pub profile: OutputProfile,
    pub subtitles: Option<SubtitleRequest>,
    pub playlist: bool,
    /// Output directory; the current directory when `None`.
    pub output_dir: Option<PathBuf>,
}

impl SessionPlan {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            quality: Quality::default(),
            profile: OutputProfile::default(),
            subtitles: None,
            playlist: false,
            output_dir: None,
        }
    }

    /// Number of files yt-dlp writes before post-processing: one for audio
    /// only, video plus audio otherwise, plus one for a subtitle track.
    pub fn total_stages(&self) -> usize {
        let mut stages = if self.quality == Quality::AudioOnly { 1 } else { 2 };
        if self.subtitles.is_some() {
            stages += 1;
        }
        stages
    }

    /// Whether per-stage progress tracking applies.
    pub fn is_staged(&self) -> bool {
        !self.playlist
    }

    /// Format-selection arguments for the chosen quality and profile.
    pub fn format_args(&self) -> Vec<String> {
        if self.quality == Quality::AudioOnly {
            return ["-x", "--audio-format", "mp3"].map(String::from).to_vec();
        }

        let height = self
            .quality
            .max_height()
            .map(|h| format!("[height<={h}]"))
            .unwrap_or_default();

        let selector = match self.profile {
            OutputProfile::Compatibility => format!(
                "bestvideo[vcodec^=avc1]{h}+bestaudio[acodec^=mp4a]\
                 /best[vcodec^=avc1][acodec^=mp4a]{h}\
                 /bestvideo{h}+bestaudio/best{h}",
                h = height
            ),
            OutputProfile::SmallerFiles => format!(
                "bestvideo[vcodec^=av01]{h}+bestaudio[acodec^=opus]\
                 /bestvideo[vcodec^=vp9]{h}+bestaudio[acodec^=opus]\
                 /bestvideo{h}+bestaudio/best{h}",
                h = height
            ),
        };

        vec!["-f".to_string(), selector]
    }

    /// Output template passed to `-o`.
    pub fn output_template(&self) -> String {
        let template = "%(title)s.%(ext)s";
        match &self.output_dir {
            Some(dir) => dir.join(template).to_string_lossy().into_owned(),
            None => template.to_string(),
        }
    }

    /// Full yt-dlp argument list, URL last.
    pub fn ytdlp_args(&self, ffmpeg_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "--ffmpeg-location".to_string(),
            ffmpeg_dir.to_string_lossy().into_owned(),
            "-o".to_string(),
            self.output_template(),
            "--newline".to_string(),
        ];
        args.extend(self.format_args());

        args.push(if self.playlist { "--yes-playlist" } else { "--no-playlist" }.to_string());

        let merge_format = self.profile.merge_format();
        if let Some(subs) = &self.subtitles {
            args.extend([
                "--embed-subs".to_string(),
                "--sub-lang".to_string(),
                subs.code.clone(),
            ]);
            args.push(if subs.auto { "--write-auto-subs" } else { "--write-subs" }.to_string());
            if merge_format == "mp4" {
                args.extend(["--convert-subs".to_string(), "srt".to_string()]);
            }
            args.extend([
                "--postprocessor-args".to_string(),
                "EmbedSubtitle+ffmpeg:-disposition:s:0 default".to_string(),
            ]);
        }

        args.extend([
            "--merge-output-format".to_string(),
            merge_format.to_string(),
        ]);
        args.push(self.url.clone());
        args
    }
}
