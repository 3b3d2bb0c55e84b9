use std::fmt;

use thiserror::Error;

use crate::core::models::RunState;

/// Every way a run can stop short of DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyRunning,
    SourceNotFound,
    RemoteUnreachable,
    InsufficientSpace,
    TransferError,
    VerificationError,
    DeviceNotFound,
    UnmountError,
    UnsupportedFilesystem,
    ToolMissing,
    FormatError,
    UnsupportedPlatform,
    OperatorAborted,
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "AlreadyRunning",
            Self::SourceNotFound => "SourceNotFound",
            Self::RemoteUnreachable => "RemoteUnreachable",
            Self::InsufficientSpace => "InsufficientSpace",
            Self::TransferError => "TransferError",
            Self::VerificationError => "VerificationError",
            Self::DeviceNotFound => "DeviceNotFound",
            Self::UnmountError => "UnmountError",
            Self::UnsupportedFilesystem => "UnsupportedFilesystem",
            Self::ToolMissing => "ToolMissing",
            Self::FormatError => "FormatError",
            Self::UnsupportedPlatform => "UnsupportedPlatform",
            Self::OperatorAborted => "OperatorAborted",
            Self::Interrupted => "Interrupted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure tagged with the step it happened in.
///
/// Gateways build these without knowing the orchestrator's state, so `step`
/// starts out as whatever the gateway guessed and is overwritten with
/// [`WorkflowError::at`] once the orchestrator sees it.
#[derive(Debug, Clone, Error)]
#[error("{kind} during {step}: {message}")]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub step: RunState,
    pub message: String,
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, step: RunState, message: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            message: message.into(),
        }
    }

    pub fn at(mut self, step: RunState) -> Self {
        self.step = step;
        self
    }

    pub fn device_not_found(mount_path: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::DeviceNotFound,
            RunState::Unmount,
            format!("no block device found for {}: {}", mount_path, detail),
        )
    }

    pub fn tool_missing(tool: &str) -> Self {
        Self::new(
            ErrorKind::ToolMissing,
            RunState::Preflight,
            format!("required tool '{}' was not found on PATH", tool),
        )
    }

    pub fn unsupported_filesystem(value: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedFilesystem,
            RunState::Start,
            format!("'{}' is not a supported filesystem (expected exFAT or FAT32)", value),
        )
    }

    pub fn unsupported_platform(os: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedPlatform,
            RunState::Preflight,
            format!("platform '{}' is not supported (expected macos or linux)", os),
        )
    }
}
