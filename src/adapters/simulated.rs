use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::info;

use crate::core::device::{DeviceResolver, Platform};
use crate::core::error::{ErrorKind, WorkflowError};
use crate::core::format::{FormatGateway, FsType};
use crate::core::models::{DeviceHandle, RunState};
use crate::core::orchestrator::Gateways;
use crate::core::prompt::Prompter;
use crate::core::remote::{CopyOptions, CopySummary, RemoteGateway, VerifyOptions};

/// How the simulated card, remote and disk tools behave.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub device: String,
    pub reachable: bool,
    pub free_space: Option<u64>,
    pub copied_bytes: u64,
    pub remote_tool_missing: bool,
    pub format_tool_missing: bool,
    pub fail_copy: bool,
    pub fail_verify: bool,
    pub fail_resolve: bool,
    pub fail_unmount: bool,
    pub fail_format: bool,
    /// Operator answers, consumed in order. Running out reads as no input.
    pub answers: Vec<bool>,
    pub copy_delay: Duration,
    pub resolve_delay: Duration,
    pub format_delay: Duration,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            device: "/dev/simulated0".to_string(),
            reachable: true,
            free_space: Some(64 * 1024 * 1024 * 1024),
            copied_bytes: 500 * 1024 * 1024,
            remote_tool_missing: false,
            format_tool_missing: false,
            fail_copy: false,
            fail_verify: false,
            fail_resolve: false,
            fail_unmount: false,
            fail_format: false,
            answers: Vec::new(),
            copy_delay: Duration::ZERO,
            resolve_delay: Duration::ZERO,
            format_delay: Duration::ZERO,
        }
    }
}

/// A gateway call, as recorded by [`SimulatedHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CheckReachable { dest: String },
    QueryFreeSpace { dest: String },
    Copy { dry_run: bool },
    Verify { one_way: bool, size_only: bool },
    Resolve { mount_path: String },
    Unmount { device: String },
    Format { device: String, fs_type: FsType, label: String },
    Prompt { question: String },
}

/// In-memory stand-in for the card, the remote and the disk tools.
///
/// Records every call so tests can assert on what the workflow did.
#[derive(Clone)]
pub struct SimulatedHost {
    plan: SimulationPlan,
    calls: Arc<Mutex<Vec<Call>>>,
    answers: Arc<Mutex<VecDeque<bool>>>,
}

impl SimulatedHost {
    pub fn new(plan: SimulationPlan) -> Self {
        let answers = plan.answers.iter().copied().collect();
        Self {
            plan,
            calls: Arc::new(Mutex::new(Vec::new())),
            answers: Arc::new(Mutex::new(answers)),
        }
    }

    /// Gateways that route every collaborator, prompts included, here.
    pub fn gateways(&self, platform: Platform) -> Gateways {
        let host = Arc::new(self.clone());
        Gateways {
            platform,
            resolver: host.clone(),
            remote: host.clone(),
            formatter: host.clone(),
            prompter: host,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn formatted(&self) -> bool {
        self.count(|c| matches!(c, Call::Format { .. })) > 0
    }

    pub fn unmounted(&self) -> bool {
        self.count(|c| matches!(c, Call::Unmount { .. })) > 0
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DeviceResolver for SimulatedHost {
    async fn resolve(&self, mount_path: &str) -> Result<DeviceHandle, WorkflowError> {
        self.record(Call::Resolve {
            mount_path: mount_path.to_string(),
        });
        if !self.plan.resolve_delay.is_zero() {
            sleep(self.plan.resolve_delay).await;
        }
        if self.plan.fail_resolve {
            return Err(WorkflowError::device_not_found(mount_path, "simulated card not present"));
        }
        Ok(DeviceHandle {
            mount_path: mount_path.to_string(),
            device_identifier: self.plan.device.clone(),
        })
    }
}

#[async_trait]
impl RemoteGateway for SimulatedHost {
    fn ensure_tool(&self) -> Result<(), WorkflowError> {
        if self.plan.remote_tool_missing {
            Err(WorkflowError::tool_missing("rclone"))
        } else {
            Ok(())
        }
    }

    async fn check_reachable(&self, dest: &str, _timeout: Duration) -> bool {
        self.record(Call::CheckReachable {
            dest: dest.to_string(),
        });
        self.plan.reachable
    }

    async fn query_free_space(&self, dest: &str) -> Option<u64> {
        self.record(Call::QueryFreeSpace {
            dest: dest.to_string(),
        });
        self.plan.free_space
    }

    async fn copy(
        &self,
        source: &str,
        dest: &str,
        options: CopyOptions,
    ) -> Result<CopySummary, WorkflowError> {
        self.record(Call::Copy {
            dry_run: options.dry_run,
        });
        info!(source, dest, dry_run = options.dry_run, "(Simulated) copying");

        if !self.plan.copy_delay.is_zero() {
            sleep(self.plan.copy_delay).await;
        }
        if self.plan.fail_copy {
            return Err(WorkflowError::new(
                ErrorKind::TransferError,
                RunState::Transfer,
                "simulated copy failure",
            ));
        }
        Ok(CopySummary {
            bytes: Some(self.plan.copied_bytes),
            files: Some(1),
            simulated: options.dry_run,
        })
    }

    async fn verify(
        &self,
        _source: &str,
        _dest: &str,
        options: VerifyOptions,
    ) -> Result<(), WorkflowError> {
        self.record(Call::Verify {
            one_way: options.one_way,
            size_only: options.size_only,
        });
        if self.plan.fail_verify {
            return Err(WorkflowError::new(
                ErrorKind::VerificationError,
                RunState::Verify,
                "simulated size mismatch",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FormatGateway for SimulatedHost {
    fn ensure_tool(&self, fs_type: FsType) -> Result<(), WorkflowError> {
        if self.plan.format_tool_missing {
            Err(WorkflowError::tool_missing(match fs_type {
                FsType::ExFat => "mkfs.exfat",
                FsType::Fat32 => "mkfs.vfat",
            }))
        } else {
            Ok(())
        }
    }

    async fn unmount(&self, device: &DeviceHandle) -> Result<(), WorkflowError> {
        self.record(Call::Unmount {
            device: device.device_identifier.clone(),
        });
        if self.plan.fail_unmount {
            return Err(WorkflowError::new(
                ErrorKind::UnmountError,
                RunState::Unmount,
                "simulated device busy",
            ));
        }
        Ok(())
    }

    async fn format(
        &self,
        device: &str,
        fs_type: FsType,
        label: &str,
    ) -> Result<(), WorkflowError> {
        self.record(Call::Format {
            device: device.to_string(),
            fs_type,
            label: label.to_string(),
        });
        info!(device, %fs_type, label, "(Simulated) formatting");

        if !self.plan.format_delay.is_zero() {
            sleep(self.plan.format_delay).await;
        }
        if self.plan.fail_format {
            return Err(WorkflowError::new(
                ErrorKind::FormatError,
                RunState::Format,
                "simulated format failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Prompter for SimulatedHost {
    async fn confirm(&self, question: &str) -> Result<bool> {
        self.record(Call::Prompt {
            question: question.to_string(),
        });
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no answer available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let host = SimulatedHost::new(SimulationPlan::default());
        assert!(host.check_reachable("remote:x", Duration::from_secs(1)).await);
        let handle = host.resolve("/mnt/card").await.unwrap();
        assert_eq!(handle.device_identifier, "/dev/simulated0");

        assert_eq!(
            host.calls(),
            vec![
                Call::CheckReachable {
                    dest: "remote:x".into()
                },
                Call::Resolve {
                    mount_path: "/mnt/card".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn answers_run_out_as_errors() {
        let host = SimulatedHost::new(SimulationPlan {
            answers: vec![true],
            ..Default::default()
        });
        assert!(host.confirm("first?").await.unwrap());
        assert!(host.confirm("second?").await.is_err());
    }
}
