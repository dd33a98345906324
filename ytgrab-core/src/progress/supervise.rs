//! Subprocess supervision for a yt-dlp download session.
//!
//! The child's stdout and stderr are read by two independent tasks. Both feed
//! the same [`ProgressTracker`] and push [`SupervisorEvent`]s into one
//! unbounded channel, so a consumer sees a single ordered event stream per
//! read loop.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::parse::{compact_status, parse_progress, should_show_in_user_log, truncate_for_log};
use super::tracker::{ProgressTracker, ProgressUpdate};
use crate::error::{ProvisionError, Result};
use crate::process::background_command;

// =============================================================================
// Events
// =============================================================================

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Events emitted while a supervised process runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// Every non-empty line, unfiltered.
    RawLine { stream: OutputStream, line: String },

    /// A line worth showing to the user, already truncated.
    UserLine(String),

    /// Session progress changed.
    Progress(ProgressUpdate),

    /// The process exited. `code` is `None` when it was killed by a signal.
    Exited { success: bool, code: Option<i32> },
}

// =============================================================================
// Channel Types
// =============================================================================

/// Sender for supervisor events.
pub type EventSender = mpsc::UnboundedSender<SupervisorEvent>;

/// Receiver for supervisor events.
pub type EventReceiver = mpsc::UnboundedReceiver<SupervisorEvent>;

/// Create an event channel for streaming supervisor events.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

// =============================================================================
// Supervision
// =============================================================================

/// A running supervised process.
#[derive(Debug)]
pub struct Supervised {
    /// Event stream; closes after [`SupervisorEvent::Exited`].
    pub events: EventReceiver,
    task: JoinHandle<Result<ExitStatus>>,
}

impl Supervised {
    /// Waits for the process and both read loops to finish.
    pub async fn wait(self) -> Result<ExitStatus> {
        self.task
            .await
            .map_err(|e| ProvisionError::fs("supervisor task failed", std::io::Error::other(e)))?
    }
}

/// Progress for a line when no tracker is active: the raw percentage of
/// whatever file is currently downloading.
pub fn unstaged_update(line: &str) -> Option<ProgressUpdate> {
    let fraction = parse_progress(line)?.clamp(0.0, 1.0);
    Some(ProgressUpdate {
        fraction,
        status: compact_status(line).unwrap_or_else(|| "Downloading...".to_string()),
    })
}

/// Spawns `program` and starts supervising its output.
///
/// With a tracker, progress events are staged session fractions; without
/// one (playlists), raw per-file percentages are passed through. Raising
/// `cancel` kills the child and makes [`Supervised::wait`] return
/// [`ProvisionError::Cancelled`].
pub fn spawn_supervised<I, S>(
    program: &Path,
    args: I,
    tracker: Option<Arc<ProgressTracker>>,
    cancel: CancellationToken,
) -> Result<Supervised>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = background_command(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("PYTHONIOENCODING", "utf-8")
        .env("NO_COLOR", "1");

    let mut child = cmd.spawn().map_err(|source| ProvisionError::Spawn {
        path: program.to_path_buf(),
        source,
    })?;
    info!("Started {} (pid {:?})", program.display(), child.id());

    let (tx, rx) = event_channel();

    let readers: Vec<JoinHandle<()>> = [
        child
            .stdout
            .take()
            .map(|out| spawn_reader(out, OutputStream::Stdout, tracker.clone(), tx.clone())),
        child
            .stderr
            .take()
            .map(|err| spawn_reader(err, OutputStream::Stderr, tracker.clone(), tx.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let task = tokio::spawn(run_to_exit(child, readers, tx, cancel));

    Ok(Supervised { events: rx, task })
}

async fn run_to_exit(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    tx: EventSender,
    cancel: CancellationToken,
) -> Result<ExitStatus> {
    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| ProvisionError::fs("could not wait for child process", e))?
        }
        _ = cancel.cancelled() => {
            debug!("Supervised process canceled, killing child");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill child process: {}", e);
            }
            for reader in &readers {
                reader.abort();
            }
            return Err(ProvisionError::Cancelled);
        }
    };

    for reader in readers {
        if let Err(e) = reader.await {
            warn!("Output reader ended abnormally: {}", e);
        }
    }

    debug!("Supervised process exited with {}", status);
    let _ = tx.send(SupervisorEvent::Exited {
        success: status.success(),
        code: status.code(),
    });
    Ok(status)
}

fn spawn_reader<R>(
    pipe: R,
    stream: OutputStream,
    tracker: Option<Arc<ProgressTracker>>,
    tx: EventSender,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf);
                    // Without --newline yt-dlp redraws progress with bare CRs.
                    for line in chunk.split(['\r', '\n']) {
                        handle_line(line, stream, tracker.as_deref(), &tx);
                    }
                }
                Err(e) => {
                    warn!("Failed to read {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}

fn handle_line(
    line: &str,
    stream: OutputStream,
    tracker: Option<&ProgressTracker>,
    tx: &EventSender,
) {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return;
    }
    trace!(?stream, "{}", line);

    let _ = tx.send(SupervisorEvent::RawLine {
        stream,
        line: line.to_string(),
    });

    if should_show_in_user_log(line) {
        let _ = tx.send(SupervisorEvent::UserLine(truncate_for_log(line.trim())));
    }

    let update = match tracker {
        Some(tracker) => tracker.update(line),
        None => unstaged_update(line),
    };
    if let Some(update) = update {
        let _ = tx.send(SupervisorEvent::Progress(update));
    }
}
