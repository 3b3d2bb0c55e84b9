use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{require_tool, run_capture, tail};
use crate::core::device::DeviceResolver;
use crate::core::error::{ErrorKind, WorkflowError};
use crate::core::format::{FormatGateway, FsType};
use crate::core::models::{DeviceHandle, RunState};

/// Resolves mount paths through `findmnt`.
pub struct FindmntResolver;

#[derive(Deserialize)]
struct FindmntOutput {
    filesystems: Vec<FindmntEntry>,
}

#[derive(Deserialize)]
struct FindmntEntry {
    source: String,
    target: String,
}

#[async_trait]
impl DeviceResolver for FindmntResolver {
    async fn resolve(&self, mount_path: &str) -> Result<DeviceHandle, WorkflowError> {
        let mount_path = normalize_mount_path(mount_path);

        let output = run_capture(
            "findmnt",
            &["--json", "--output", "SOURCE,TARGET", "--mountpoint", &mount_path],
        )
        .await
        .map_err(|e| WorkflowError::device_not_found(&mount_path, e))?;

        // findmnt exits 1 when nothing is mounted there.
        if !output.status.success() {
            return Err(WorkflowError::device_not_found(
                &mount_path,
                "no matching entry in the mount table",
            ));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        let device = parse_findmnt(&json, &mount_path)
            .map_err(|e| WorkflowError::device_not_found(&mount_path, e))?;

        debug!(mount = %mount_path, device = %device, "findmnt resolved device");
        Ok(DeviceHandle {
            mount_path,
            device_identifier: device,
        })
    }
}

fn normalize_mount_path(mount_path: &str) -> String {
    let trimmed = mount_path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Pull the backing device for `mount_path` out of `findmnt --json` output.
fn parse_findmnt(json: &str, mount_path: &str) -> anyhow::Result<String> {
    let parsed: FindmntOutput = serde_json::from_str(json)?;
    let entry = parsed
        .filesystems
        .into_iter()
        .find(|fs| fs.target == mount_path)
        .ok_or_else(|| anyhow!("no mount entry for {}", mount_path))?;

    // Bind mounts show up as "/dev/sdb1[/subdir]".
    let source = match entry.source.find('[') {
        Some(idx) => entry.source[..idx].to_string(),
        None => entry.source,
    };

    if !source.starts_with("/dev/") {
        return Err(anyhow!("{} is backed by {}, not a block device", mount_path, source));
    }
    Ok(source)
}

/// Formats with mkfs.exfat (exfatprogs) or mkfs.vfat (dosfstools).
pub struct MkfsFormatter;

impl MkfsFormatter {
    fn tool_for(fs_type: FsType) -> &'static str {
        match fs_type {
            FsType::ExFat => "mkfs.exfat",
            FsType::Fat32 => "mkfs.vfat",
        }
    }

    fn args_for<'a>(fs_type: FsType, device: &'a str, label: &'a str) -> Vec<&'a str> {
        match fs_type {
            FsType::ExFat => vec!["-L", label, device],
            FsType::Fat32 => vec!["-F", "32", "-n", label, device],
        }
    }
}

#[async_trait]
impl FormatGateway for MkfsFormatter {
    fn ensure_tool(&self, fs_type: FsType) -> Result<(), WorkflowError> {
        require_tool(Self::tool_for(fs_type))?;
        if !nix::unistd::Uid::effective().is_root() {
            warn!("Not running as root; umount and mkfs will likely be refused");
        }
        Ok(())
    }

    async fn unmount(&self, device: &DeviceHandle) -> Result<(), WorkflowError> {
        let target = device.mount_path.clone();

        tokio::task::spawn_blocking(move || {
            // Flush pending writes to the card before detaching it.
            nix::unistd::sync();
            nix::mount::umount(target.as_str())
        })
        .await
        .map_err(|e| unmount_error(device, e))?
        .map_err(|errno| unmount_error(device, errno.desc()))?;

        info!(mount = %device.mount_path, "umount complete");
        Ok(())
    }

    async fn format(
        &self,
        device: &str,
        fs_type: FsType,
        label: &str,
    ) -> Result<(), WorkflowError> {
        let tool = Self::tool_for(fs_type);
        require_tool(tool).map_err(|e| e.at(RunState::Format))?;

        let args = Self::args_for(fs_type, device, label);
        debug!(tool, ?args, "Running formatter");

        let output = run_capture(tool, &args).await.map_err(|e| {
            WorkflowError::new(ErrorKind::FormatError, RunState::Format, e.to_string())
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(WorkflowError::new(
                ErrorKind::FormatError,
                RunState::Format,
                format!("{} exited with {}: {}", tool, output.status, tail(&output.stderr, 3)),
            ))
        }
    }
}

fn unmount_error(device: &DeviceHandle, detail: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::new(
        ErrorKind::UnmountError,
        RunState::Unmount,
        format!(
            "could not unmount {} ({}): {}",
            device.mount_path, device.device_identifier, detail
        ),
    )
}
