//! ytgrab CLI
//!
//! Usage:
//!   ytgrab setup                     Download and verify yt-dlp and FFmpeg
//!   ytgrab update                    Update yt-dlp if a newer release exists
//!   ytgrab download <url> [options]  Download a video
//!   ytgrab clean                     Remove leftover download temp files
//!   ytgrab paths                     Show where tools are installed

mod app;
mod ui;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ytgrab_core::{OutputProfile, Quality};

#[derive(Parser)]
#[command(name = "ytgrab")]
#[command(about = "Video downloader with verified yt-dlp and FFmpeg provisioning")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "YTGRAB_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and verify missing tools
    Setup,

    /// Check for a newer yt-dlp and install it
    Update,

    /// Download a video or playlist
    Download {
        /// Video or playlist URL
        url: String,

        /// Quality: best, 1080p, 720p, 480p, audio
        #[arg(short, long, default_value = "best")]
        quality: Quality,

        /// Output profile: smaller (AV1/VP9, mkv) or compatibility (H.264/AAC, mp4)
        #[arg(short, long, default_value = "smaller")]
        profile: OutputProfile,

        /// Subtitle language to download and embed (e.g. en)
        #[arg(short, long)]
        subs: Option<String>,

        /// Use auto-generated captions for --subs
        #[arg(long, requires = "subs")]
        auto_subs: bool,

        /// Download the whole playlist
        #[arg(long)]
        playlist: bool,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the yt-dlp update check
        #[arg(long)]
        no_update: bool,
    },

    /// Remove leftover download temp files
    Clean,

    /// Show tool locations and whether they are installed
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let directive = if cli.verbose {
        "ytgrab_core=debug"
    } else {
        "ytgrab_core=warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse()?)
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    tracing::debug!("Starting ytgrab v{}", ytgrab_core::VERSION);

    let app = app::App::new(cli.config.as_deref())?;

    match cli.command {
        Commands::Setup => app.setup().await,
        Commands::Update => app.update().await,
        Commands::Download {
            url,
            quality,
            profile,
            subs,
            auto_subs,
            playlist,
            output,
            no_update,
        } => {
            let plan = app::build_plan(url, quality, profile, subs, auto_subs, playlist, output);
            app.download(plan, !no_update).await
        }
        Commands::Clean => {
            app.clean();
            Ok(())
        }
        Commands::Paths => {
            app.paths();
            Ok(())
        }
    }
}
