use std::fmt;

use async_trait::async_trait;

use crate::core::error::WorkflowError;
use crate::core::models::DeviceHandle;

/// Host platform families the workflow knows how to drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    /// `diskutil`-driven (macOS)
    MacOs,
    /// `findmnt`/`mkfs`-driven
    Linux,
    Other(String),
}

impl Platform {
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "macos" => Self::MacOs,
            "linux" => Self::Linux,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn ensure_supported(&self) -> Result<(), WorkflowError> {
        match self {
            Self::Other(os) => Err(WorkflowError::unsupported_platform(os)),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MacOs => f.write_str("macos"),
            Self::Linux => f.write_str("linux"),
            Self::Other(os) => f.write_str(os),
        }
    }
}

/// Maps a mount path to the block device currently backing it.
///
/// Implementations are read-only queries. Results are not stable across
/// calls, so callers resolve right before they act on the device.
#[async_trait]
pub trait DeviceResolver: Send + Sync {
    async fn resolve(&self, mount_path: &str) -> Result<DeviceHandle, WorkflowError>;
}
