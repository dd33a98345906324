//! Atomic replacement of installed tools.
//!
//! The new file is moved into a same-directory staging sibling
//! (`<target>.new`), made executable, and renamed over the target. Readers
//! of the target see either the old file or the new one, never a partial
//! write.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use super::paths::staging_path;
use crate::error::{ProvisionError, Result};

/// Sets executable permission on a file (Unix only).
///
/// On Windows, this is a no-op.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| {
            ProvisionError::fs(
                format!("failed to set executable permission on {}", path.display()),
                e,
            )
        })?;

        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}

/// Installs `source` at `target` atomically.
///
/// `source` is consumed: it is moved (or copied, across filesystems) into the
/// staging sibling. On failure the staging sibling is removed and `target`
/// is left as it was.
///
/// # Errors
///
/// Returns a filesystem error naming the step that failed.
pub fn install(target: &Path, source: &Path) -> Result<()> {
    let staging = staging_path(target);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProvisionError::fs(format!("failed to create {}", parent.display()), e)
        })?;
    }

    match fs::remove_file(&staging) {
        Ok(()) => debug!("Removed stale staging file {}", staging.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ProvisionError::fs(
                format!("failed to remove stale {}", staging.display()),
                e,
            ))
        }
    }

    let result = stage(source, &staging).and_then(|()| {
        fs::rename(&staging, target).map_err(|e| {
            ProvisionError::fs(format!("failed to replace {}", target.display()), e)
        })
    });

    if result.is_err() {
        if let Err(e) = fs::remove_file(&staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to clean up {}", staging.display());
            }
        }
        return result;
    }

    info!("Installed {}", target.display());
    Ok(())
}

/// Moves `source` into `staging` and marks it executable.
fn stage(source: &Path, staging: &Path) -> Result<()> {
    if let Err(rename_err) = fs::rename(source, staging) {
        // Temp dir and cache dir may sit on different filesystems.
        debug!(error = %rename_err, "Rename into staging failed, copying instead");
        fs::copy(source, staging).map_err(|e| {
            ProvisionError::fs(format!("failed to stage {}", staging.display()), e)
        })?;
        if let Err(e) = fs::remove_file(source) {
            warn!(error = %e, "Failed to remove {}", source.display());
        }
    }
    make_executable(staging)
}
