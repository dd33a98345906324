//! Progress inference from yt-dlp output.
//!
//! - `parse`: line classification and user-log filtering
//! - `plan`: session parameters and the yt-dlp argument list
//! - `tracker`: staged, monotonic session progress
//! - `supervise`: child process supervision feeding the tracker

pub mod parse;
pub mod plan;
pub mod supervise;
pub mod tracker;

pub use parse::{classify_line, parse_progress, should_show_in_user_log, LineKind};
pub use plan::{OutputProfile, Quality, SessionPlan, SubtitleRequest};
pub use supervise::{
    event_channel, spawn_supervised, EventReceiver, EventSender, OutputStream, Supervised,
    SupervisorEvent,
};
pub use tracker::{ProgressTracker, ProgressUpdate};
