use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::WorkflowError;
use crate::core::models::DeviceHandle;

/// Filesystems a card can be reformatted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsType {
    #[serde(rename = "exFAT")]
    ExFat,
    #[serde(rename = "FAT32")]
    Fat32,
}

impl FsType {
    /// Parse a user supplied name. Anything but exFAT/FAT32 is rejected
    /// here, before a formatting tool is ever looked up.
    pub fn parse(s: &str) -> Result<Self, WorkflowError> {
        match s.trim().to_lowercase().as_str() {
            "exfat" => Ok(Self::ExFat),
            "fat32" | "vfat" | "ms-dos fat32" => Ok(Self::Fat32),
            _ => Err(WorkflowError::unsupported_filesystem(s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExFat => "exFAT",
            Self::Fat32 => "FAT32",
        }
    }

    /// Longest volume label the filesystem accepts.
    pub fn max_label_len(&self) -> usize {
        match self {
            Self::ExFat => 15,
            Self::Fat32 => 11,
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, irreversible disk operations.
///
/// Nothing here asks for confirmation; that is the orchestrator's job.
#[async_trait]
pub trait FormatGateway: Send + Sync {
    /// Fail with `ToolMissing` if `fs_type` cannot be created on this host.
    /// Called during preflight so a card is never unmounted for nothing.
    fn ensure_tool(&self, fs_type: FsType) -> Result<(), WorkflowError>;

    /// Unmount the volume. Implementations pick whichever half of the
    /// handle their platform tool wants.
    async fn unmount(&self, device: &DeviceHandle) -> Result<(), WorkflowError>;

    async fn format(&self, device: &str, fs_type: FsType, label: &str)
    -> Result<(), WorkflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(FsType::parse("exFAT").unwrap(), FsType::ExFat);
        assert_eq!(FsType::parse("EXFAT").unwrap(), FsType::ExFat);
        assert_eq!(FsType::parse("fat32").unwrap(), FsType::Fat32);
        assert_eq!(FsType::parse(" vfat ").unwrap(), FsType::Fat32);
    }

    #[test]
    fn parse_rejects_other_filesystems() {
        for bad in ["ntfs", "ext4", "apfs", ""] {
            let err = FsType::parse(bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::UnsupportedFilesystem);
        }
    }
}
