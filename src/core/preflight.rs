//! Checks run before anything touches the card or the remote.

use std::fs;
use std::io::{self, ErrorKind as IoErrorKind};
use std::path::Path;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, warn};

use crate::core::error::{ErrorKind, WorkflowError};
use crate::core::models::{CapacityCheck, RunState};

pub fn check_source(source: &Path) -> Result<(), WorkflowError> {
    if source.is_dir() {
        Ok(())
    } else {
        Err(WorkflowError::new(
            ErrorKind::SourceNotFound,
            RunState::Preflight,
            format!("{} does not exist or is not a directory", source.display()),
        ))
    }
}

/// Whether the volume carries the subdirectory we expect on the right card.
pub fn has_marker_dir(source: &Path, marker: &str) -> bool {
    if marker.is_empty() {
        return true;
    }
    source.join(marker).is_dir()
}

/// Compare the size of the source tree against what the remote reports free.
///
/// Files already present at the destination are not subtracted, so this
/// overstates what the copy needs.
pub fn check_capacity(
    required_bytes: u64,
    available_bytes: u64,
) -> Result<CapacityCheck, WorkflowError> {
    let check = CapacityCheck {
        required_bytes,
        available_bytes,
    };
    if check.fits() {
        Ok(check)
    } else {
        Err(WorkflowError::new(
            ErrorKind::InsufficientSpace,
            RunState::Preflight,
            format!(
                "source needs {} bytes but destination has {} bytes free",
                required_bytes, available_bytes
            ),
        ))
    }
}

/// Total size in bytes of the regular files under `source`.
pub async fn source_size(source: &Path) -> Result<u64> {
    let source = source.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut total_bytes: u64 = 0;
        let mut files: u64 = 0;
        scan_recursive(&source, &mut total_bytes, &mut files)?;
        debug!(path = %source.display(), total_bytes, files, "Source scan complete");
        Ok(total_bytes)
    })
    .await?
}

fn scan_recursive(current: &Path, total_bytes: &mut u64, files: &mut u64) -> Result<()> {
    let entries = fs::read_dir(current).map_err(|e| {
        if is_device_removed_error(&e) {
            anyhow!("Device appears to have been removed: {}", e)
        } else {
            anyhow!("Failed to read directory {}: {}", current.display(), e)
        }
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            if is_device_removed_error(&e) {
                anyhow!("Device appears to have been removed: {}", e)
            } else {
                anyhow!("Failed to read directory entry: {}", e)
            }
        })?;

        let path = entry.path();

        // Symlinks are not followed.
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                if is_device_removed_error(&e) {
                    bail!("Device appears to have been removed: {}", e);
                }
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            scan_recursive(&path, total_bytes, files)?;
        } else if metadata.is_file() {
            *total_bytes += metadata.len();
            *files += 1;
        }
    }

    Ok(())
}

/// I/O errors that usually mean the card was pulled mid-scan.
fn is_device_removed_error(e: &io::Error) -> bool {
    if e.kind() == IoErrorKind::NotFound {
        return true;
    }
    matches!(
        e.raw_os_error(),
        Some(libc::EIO) | Some(libc::ENODEV) | Some(libc::ENXIO)
    )
}
