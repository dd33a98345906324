//! Child process helpers.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;

/// Suppresses the console window for children of a GUI-subsystem process.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Builds a command for a headless child process.
///
/// stdin is closed, the child is killed if its handle is dropped, and on
/// Windows no console window is created.
pub fn background_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    cmd
}
