use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::{require_tool, run_capture, tail};
use crate::core::device::DeviceResolver;
use crate::core::error::{ErrorKind, WorkflowError};
use crate::core::format::{FormatGateway, FsType};
use crate::core::models::{DeviceHandle, RunState};

/// Resolves mount paths through `diskutil info -plist`.
pub struct DiskutilResolver;

#[async_trait]
impl DeviceResolver for DiskutilResolver {
    async fn resolve(&self, mount_path: &str) -> Result<DeviceHandle, WorkflowError> {
        let output = run_capture("diskutil", &["info", "-plist", mount_path])
            .await
            .map_err(|e| WorkflowError::device_not_found(mount_path, e))?;

        if !output.status.success() {
            return Err(WorkflowError::device_not_found(
                mount_path,
                format!("diskutil info exited with {}", output.status),
            ));
        }

        let plist = String::from_utf8_lossy(&output.stdout);
        let device = parse_device_node(&plist).ok_or_else(|| {
            WorkflowError::device_not_found(mount_path, "diskutil reported no DeviceNode")
        })?;

        debug!(mount = %mount_path, device = %device, "diskutil resolved device");
        Ok(DeviceHandle {
            mount_path: mount_path.to_string(),
            device_identifier: device,
        })
    }
}

/// Extract `<key>DeviceNode</key><string>/dev/diskNsM</string>` from a plist.
fn parse_device_node(plist: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"<key>DeviceNode</key>\s*<string>([^<]+)</string>").expect("valid regex")
    });

    re.captures(plist)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Unmounts and erases through `diskutil`.
pub struct DiskutilFormatter;

impl DiskutilFormatter {
    fn personality(fs_type: FsType) -> &'static str {
        match fs_type {
            FsType::ExFat => "ExFAT",
            FsType::Fat32 => "MS-DOS FAT32",
        }
    }
}

#[async_trait]
impl FormatGateway for DiskutilFormatter {
    fn ensure_tool(&self, _fs_type: FsType) -> Result<(), WorkflowError> {
        require_tool("diskutil").map(|_| ())
    }

    async fn unmount(&self, device: &DeviceHandle) -> Result<(), WorkflowError> {
        let output = run_capture("diskutil", &["unmount", &device.device_identifier])
            .await
            .map_err(|e| {
                WorkflowError::new(ErrorKind::UnmountError, RunState::Unmount, e.to_string())
            })?;

        if !output.status.success() {
            return Err(WorkflowError::new(
                ErrorKind::UnmountError,
                RunState::Unmount,
                format!(
                    "diskutil unmount {} exited with {}: {}",
                    device.device_identifier,
                    output.status,
                    tail(&output.stderr, 3)
                ),
            ));
        }

        info!(device = %device.device_identifier, "diskutil unmount complete");
        Ok(())
    }

    async fn format(
        &self,
        device: &str,
        fs_type: FsType,
        label: &str,
    ) -> Result<(), WorkflowError> {
        let personality = Self::personality(fs_type);
        let output = run_capture("diskutil", &["eraseVolume", personality, label, device])
            .await
            .map_err(|e| {
                WorkflowError::new(ErrorKind::FormatError, RunState::Format, e.to_string())
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(WorkflowError::new(
                ErrorKind::FormatError,
                RunState::Format,
                format!(
                    "diskutil eraseVolume {} on {} exited with {}: {}",
                    personality,
                    device,
                    output.status,
                    tail(&output.stderr, 3)
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>BusProtocol</key>
	<string>USB</string>
	<key>DeviceNode</key>
	<string>/dev/disk4s1</string>
	<key>MountPoint</key>
	<string>/Volumes/NO NAME</string>
</dict>
</plist>"#;

    #[test]
    fn extracts_device_node() {
        assert_eq!(parse_device_node(PLIST).as_deref(), Some("/dev/disk4s1"));
    }

    #[test]
    fn missing_device_node() {
        assert_eq!(parse_device_node("<plist><dict></dict></plist>"), None);
        assert_eq!(
            parse_device_node("<key>DeviceNode</key><string></string>"),
            None
        );
    }

    #[test]
    fn erase_personalities() {
        assert_eq!(DiskutilFormatter::personality(FsType::ExFat), "ExFAT");
        assert_eq!(DiskutilFormatter::personality(FsType::Fat32), "MS-DOS FAT32");
    }
}
