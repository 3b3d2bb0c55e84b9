use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Report what would be copied without touching the destination.
    pub dry_run: bool,
    pub verbose: bool,
    pub progress_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Only check that every source object is present at the destination;
    /// extra destination objects are not errors.
    pub one_way: bool,
    /// Compare sizes instead of checksums. Faster, but silent bit rot on
    /// the destination goes unnoticed.
    pub size_only: bool,
    pub verbose: bool,
}

/// What a copy reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub bytes: Option<u64>,
    pub files: Option<u64>,
    pub simulated: bool,
}

/// Opaque remote transfer service (rclone in production).
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fail with `ToolMissing` if the transfer tool is not installed.
    fn ensure_tool(&self) -> Result<(), WorkflowError>;

    /// Cheap listing call bounded by `timeout`. Any connectivity or auth
    /// failure is reported as `false`, never as an error.
    async fn check_reachable(&self, dest: &str, timeout: Duration) -> bool;

    /// Best effort; `None` when the backend cannot tell or the query fails.
    async fn query_free_space(&self, dest: &str) -> Option<u64>;

    async fn copy(
        &self,
        source: &str,
        dest: &str,
        options: CopyOptions,
    ) -> Result<CopySummary, WorkflowError>;

    async fn verify(
        &self,
        source: &str,
        dest: &str,
        options: VerifyOptions,
    ) -> Result<(), WorkflowError>;
}

/// `remote:path/inside` -> `remote:`. Local paths are returned unchanged.
pub fn remote_root(dest: &str) -> &str {
    match dest.find(':') {
        Some(idx) if !dest[..idx].contains('/') => &dest[..=idx],
        _ => dest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_root_strips_path() {
        assert_eq!(remote_root("remote:Backups/dashcam"), "remote:");
        assert_eq!(remote_root("gdrive:"), "gdrive:");
    }

    #[test]
    fn remote_root_keeps_local_paths() {
        assert_eq!(remote_root("/srv/backups"), "/srv/backups");
        assert_eq!(remote_root("/srv/odd:name"), "/srv/odd:name");
    }
}
