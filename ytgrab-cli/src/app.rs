//! Command implementations.
//!
//! The CLI talks to the core only through `ToolProvisioner`, `UpdateChecker`
//! and the progress supervisor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use ytgrab_core::external_tools::cleanup_download_temps_in;
use ytgrab_core::progress::spawn_supervised;
use ytgrab_core::{
    EmbeddedAssets, ExternalToolId, OutputProfile, ProgressTracker, ProvisionConfig,
    ProvisionedTools, Quality, SessionPlan, SubtitleRequest, SupervisorEvent, ToolProvisioner,
    UpdateChecker,
};

use crate::ui::{self, DownloadBars};

pub struct App {
    provisioner: ToolProvisioner,
    cancel: CancellationToken,
}

impl App {
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = ProvisionConfig::load(config_path).context("Failed to load configuration")?;
        let provisioner = ToolProvisioner::new(config).context("Failed to set up provisioning")?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, canceling");
                on_interrupt.cancel();
            }
        });

        Ok(Self {
            provisioner,
            cancel,
        })
    }

    /// `ytgrab setup`
    pub async fn setup(&self) -> Result<()> {
        let tools = self.ensure_tools().await?;
        for tool in ExternalToolId::all() {
            let state = if tools.was_installed(*tool) {
                "installed"
            } else {
                "already present"
            };
            println!(
                "{:<12} {} ({})",
                tool.file_name(),
                state,
                self.provisioner.binary_path(*tool).display()
            );
        }
        Ok(())
    }

    /// `ytgrab update`
    pub async fn update(&self) -> Result<()> {
        let bars = DownloadBars::new();
        let ytdlp = self
            .provisioner
            .ensure(ExternalToolId::YtDlp, None, &|e| bars.handle(e), &self.cancel)
            .await;
        bars.finish();
        let ytdlp = ytdlp.context("yt-dlp is not available")?;

        self.run_update_check(&ytdlp).await?;
        Ok(())
    }

    /// `ytgrab download`
    pub async fn download(&self, plan: SessionPlan, check_update: bool) -> Result<()> {
        let tools = self.ensure_tools().await?;

        if check_update && !tools.was_installed(ExternalToolId::YtDlp) {
            // A failed update leaves the current yt-dlp in place.
            if let Err(e) = self.run_update_check(&tools.ytdlp).await {
                if self.cancel.is_cancelled() {
                    return Err(e);
                }
                tracing::debug!("Continuing after update failure: {e:#}");
            }
        }

        let tracker = ProgressTracker::new(&plan).map(Arc::new);
        let args = plan.ytdlp_args(tools.ffmpeg_dir());
        tracing::debug!("yt-dlp args: {:?}", args);

        let mut supervised = spawn_supervised(&tools.ytdlp, &args, tracker, self.cancel.clone())
            .context("Failed to start yt-dlp")?;

        let bar = ui::session_bar(&plan);
        let mut exit_code = None;
        while let Some(event) = supervised.events.recv().await {
            match event {
                SupervisorEvent::RawLine { line, .. } => tracing::trace!("yt-dlp: {}", line),
                SupervisorEvent::UserLine(line) => bar.println(line),
                SupervisorEvent::Progress(update) => ui::set_fraction(&bar, &update),
                SupervisorEvent::Exited { success, code } => {
                    if !success {
                        exit_code = Some(code);
                    }
                }
            }
        }

        let status = supervised.wait().await;
        match (status, exit_code) {
            (Ok(_), None) => {
                bar.finish_with_message("Done");
                Ok(())
            }
            (Ok(_), Some(code)) => {
                bar.abandon_with_message("Failed");
                match code {
                    Some(code) => bail!("yt-dlp exited with code {}", code),
                    None => bail!("yt-dlp was terminated"),
                }
            }
            (Err(e), _) => {
                bar.abandon_with_message("Canceled");
                Err(anyhow::Error::new(e).context("Download did not complete"))
            }
        }
    }

    /// `ytgrab clean`
    pub fn clean(&self) {
        let removed = cleanup_download_temps_in(self.provisioner.temp_dir());
        println!("Removed {} leftover download file(s)", removed);
    }

    /// `ytgrab paths`
    pub fn paths(&self) {
        println!("Cache directory: {}", self.provisioner.cache_dir().display());
        for tool in ExternalToolId::all() {
            let mark = if self.provisioner.binary_exists(*tool) {
                "ok"
            } else {
                "missing"
            };
            println!(
                "{:<12} {:<8} {}",
                tool.file_name(),
                mark,
                self.provisioner.binary_path(*tool).display()
            );
        }
    }

    async fn ensure_tools(&self) -> Result<ProvisionedTools> {
        let missing = self.provisioner.missing_tools();
        if !missing.is_empty() {
            tracing::info!("Missing tools: {:?}", missing);
        }

        let bars = DownloadBars::new();
        let result = self
            .provisioner
            .ensure_all(&EmbeddedAssets::default(), &|e| bars.handle(e), &self.cancel)
            .await;
        bars.finish();

        result.context("Failed to prepare yt-dlp and FFmpeg")
    }

    async fn run_update_check(&self, ytdlp: &Path) -> Result<bool> {
        let checker = UpdateChecker::new(&self.provisioner)?;
        let bars = DownloadBars::new();
        let result = checker
            .check(ytdlp, &|line| bars.println(line), &|e| bars.handle(e), &self.cancel)
            .await;
        bars.finish();
        Ok(result?)
    }
}

/// Assembles a session plan from command-line choices.
pub fn build_plan(
    url: String,
    quality: Quality,
    profile: OutputProfile,
    subs: Option<String>,
    auto_subs: bool,
    playlist: bool,
    output: Option<PathBuf>,
) -> SessionPlan {
    SessionPlan {
        quality,
        profile,
        subtitles: subs.map(|code| SubtitleRequest {
            code,
            auto: auto_subs,
        }),
        playlist,
        output_dir: output,
        ..SessionPlan::new(url)
    }
}
