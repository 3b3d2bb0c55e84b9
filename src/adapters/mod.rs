use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::core::device::{DeviceResolver, Platform};
use crate::core::error::WorkflowError;
use crate::core::format::{FormatGateway, FsType};
use crate::core::models::DeviceHandle;
use crate::core::orchestrator::Gateways;
use crate::core::prompt::StdinPrompter;

#[cfg(target_os = "linux")]
mod linux;
mod macos;
mod rclone;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{FindmntResolver, MkfsFormatter};
pub use macos::{DiskutilFormatter, DiskutilResolver};
pub use rclone::RcloneGateway;
pub use simulated::{Call, SimulatedHost, SimulationPlan};

/// Real gateways for `platform`.
///
/// Platforms without an implementation get stand-ins that fail with
/// `UnsupportedPlatform`; preflight reports that before anything runs.
pub fn get_gateways(platform: Platform) -> Gateways {
    let (resolver, formatter): (Arc<dyn DeviceResolver>, Arc<dyn FormatGateway>) = match &platform
    {
        Platform::MacOs => (
            Arc::new(DiskutilResolver) as Arc<dyn DeviceResolver>,
            Arc::new(DiskutilFormatter) as Arc<dyn FormatGateway>,
        ),
        #[cfg(target_os = "linux")]
        Platform::Linux => (
            Arc::new(FindmntResolver) as Arc<dyn DeviceResolver>,
            Arc::new(MkfsFormatter) as Arc<dyn FormatGateway>,
        ),
        other => {
            let unsupported = Arc::new(Unsupported(other.to_string()));
            (
                unsupported.clone() as Arc<dyn DeviceResolver>,
                unsupported as Arc<dyn FormatGateway>,
            )
        }
    };

    Gateways {
        platform,
        resolver,
        remote: Arc::new(RcloneGateway::default()),
        formatter,
        prompter: Arc::new(StdinPrompter),
    }
}

/// Gateways backed by an in-memory host; prompts still go to the terminal.
pub fn get_simulated_gateways(platform: Platform, host: SimulatedHost) -> Gateways {
    let host = Arc::new(host);
    Gateways {
        platform,
        resolver: host.clone(),
        remote: host.clone(),
        formatter: host,
        prompter: Arc::new(StdinPrompter),
    }
}

struct Unsupported(String);

#[async_trait]
impl DeviceResolver for Unsupported {
    async fn resolve(&self, _mount_path: &str) -> Result<DeviceHandle, WorkflowError> {
        Err(WorkflowError::unsupported_platform(&self.0))
    }
}

#[async_trait]
impl FormatGateway for Unsupported {
    fn ensure_tool(&self, _fs_type: FsType) -> Result<(), WorkflowError> {
        Err(WorkflowError::unsupported_platform(&self.0))
    }

    async fn unmount(&self, _device: &DeviceHandle) -> Result<(), WorkflowError> {
        Err(WorkflowError::unsupported_platform(&self.0))
    }

    async fn format(
        &self,
        _device: &str,
        _fs_type: FsType,
        _label: &str,
    ) -> Result<(), WorkflowError> {
        Err(WorkflowError::unsupported_platform(&self.0))
    }
}

/// Locate an executable on `PATH`.
pub(crate) fn find_in_path(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

pub(crate) fn require_tool(tool: &str) -> Result<PathBuf, WorkflowError> {
    find_in_path(tool).ok_or_else(|| WorkflowError::tool_missing(tool))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Run a tool to completion, capturing stdout and stderr.
pub(crate) async fn run_capture(program: &str, args: &[&str]) -> Result<Output> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to run {}", program))
}

/// Last few non-empty lines of tool output, for error messages.
pub(crate) fn tail(output: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let kept: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join(" | ")
}
