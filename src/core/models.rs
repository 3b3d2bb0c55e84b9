use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::error::{ErrorKind, WorkflowError};

/// Workflow states, in the only order they may be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Start,
    Preflight,
    Transfer,
    Verify,
    Confirm,
    Unmount,
    Format,
    Done,
    Failed,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Preflight => "PREFLIGHT",
            Self::Transfer => "TRANSFER",
            Self::Verify => "VERIFY",
            Self::Confirm => "CONFIRM",
            Self::Unmount => "UNMOUNT",
            Self::Format => "FORMAT",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Aborted)
    }

    /// Interrupting in one of these states can leave the card unmounted
    /// or half formatted.
    pub fn is_physically_unsafe(&self) -> bool {
        matches!(self, Self::Unmount | Self::Format)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityCheck {
    pub required_bytes: u64,
    pub available_bytes: u64,
}

impl CapacityCheck {
    pub fn fits(&self) -> bool {
        self.required_bytes <= self.available_bytes
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightResult {
    pub source_exists: bool,
    pub has_expected_marker_dir: bool,
    pub remote_reachable: bool,
    pub capacity_check: Option<CapacityCheck>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub copy_succeeded: bool,
    pub verify_succeeded: bool,
}

/// A freshly resolved mount path to block device mapping.
///
/// Never cache one of these across runs: the card in the reader may have
/// been swapped since the last lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHandle {
    pub mount_path: String,
    pub device_identifier: String,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Done,
    Failed(WorkflowError),
    Aborted { step: RunState, reason: String },
    Interrupted { step: RunState },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Done => 0,
            _ => 1,
        }
    }

    pub fn final_state(&self) -> RunState {
        match self {
            Self::Done => RunState::Done,
            Self::Failed(_) => RunState::Failed,
            Self::Aborted { .. } | Self::Interrupted { .. } => RunState::Aborted,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Done => None,
            Self::Failed(e) => Some(e.kind),
            Self::Aborted { .. } => Some(ErrorKind::OperatorAborted),
            Self::Interrupted { .. } => Some(ErrorKind::Interrupted),
        }
    }
}

/// Summary logged once per run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: RunState,
    pub error_kind: Option<String>,
    pub dry_run: bool,
    pub preflight: PreflightResult,
    pub transfer: TransferOutcome,
    pub device: Option<DeviceHandle>,
}
