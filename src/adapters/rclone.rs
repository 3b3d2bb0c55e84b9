use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{require_tool, run_capture, tail};
use crate::core::error::{ErrorKind, WorkflowError};
use crate::core::models::RunState;
use crate::core::remote::{CopyOptions, CopySummary, RemoteGateway, VerifyOptions, remote_root};
use crate::logging::LogThrottle;

/// Remote transfers through the `rclone` CLI.
pub struct RcloneGateway {
    binary: String,
}

impl Default for RcloneGateway {
    fn default() -> Self {
        Self {
            binary: "rclone".to_string(),
        }
    }
}

impl RcloneGateway {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn spawn_error(&self, kind: ErrorKind, step: RunState, e: std::io::Error) -> WorkflowError {
        if e.kind() == std::io::ErrorKind::NotFound {
            WorkflowError::tool_missing(&self.binary).at(step)
        } else {
            WorkflowError::new(kind, step, format!("failed to start {}: {}", self.binary, e))
        }
    }
}

#[async_trait]
impl RemoteGateway for RcloneGateway {
    fn ensure_tool(&self) -> Result<(), WorkflowError> {
        require_tool(&self.binary).map(|_| ())
    }

    async fn check_reachable(&self, dest: &str, timeout: Duration) -> bool {
        let root = remote_root(dest);
        let lsd_args = ["lsd", root, "--max-depth", "1"];
        let listing = run_capture(&self.binary, &lsd_args);

        match tokio::time::timeout(timeout, listing).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                debug!(remote = root, stderr = %tail(&output.stderr, 3), "rclone lsd failed");
                false
            }
            Ok(Err(e)) => {
                debug!(remote = root, error = %e, "rclone lsd could not run");
                false
            }
            Err(_) => {
                debug!(remote = root, timeout_secs = timeout.as_secs(), "rclone lsd timed out");
                false
            }
        }
    }

    async fn query_free_space(&self, dest: &str) -> Option<u64> {
        let root = remote_root(dest);
        let output = run_capture(&self.binary, &["about", root, "--json"])
            .await
            .ok()?;

        if !output.status.success() {
            debug!(remote = root, stderr = %tail(&output.stderr, 3), "rclone about unsupported or failed");
            return None;
        }
        parse_about_free(&String::from_utf8_lossy(&output.stdout))
    }

    async fn copy(
        &self,
        source: &str,
        dest: &str,
        options: CopyOptions,
    ) -> Result<CopySummary, WorkflowError> {
        let interval = options.progress_interval_secs.max(1);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("copy")
            .arg(source)
            .arg(dest)
            .arg("--stats")
            .arg(format!("{}s", interval))
            .arg("--stats-one-line")
            .arg("--stats-log-level")
            .arg("NOTICE");
        if options.dry_run {
            cmd.arg("--dry-run");
        }
        if options.verbose {
            cmd.arg("-v");
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(ErrorKind::TransferError, RunState::Transfer, e))?;

        let stderr = child.stderr.take().ok_or_else(|| {
            WorkflowError::new(
                ErrorKind::TransferError,
                RunState::Transfer,
                "failed to capture rclone output",
            )
        })?;

        let throttle = LogThrottle::new(Duration::from_secs(interval));
        let mut tracker = CopyTracker::default();
        // Split on raw bytes: file names rclone echoes need not be UTF-8, and
        // the pipe must be drained until EOF or rclone blocks on write.
        let mut lines = BufReader::new(stderr).split(b'\n');

        loop {
            let raw = match lines.next_segment().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read rclone output");
                    break;
                }
            };
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');
            if let Some(stats) = tracker.observe(line) {
                if throttle.should_log() {
                    info!(
                        bytes_copied = stats.bytes_done,
                        total_bytes = stats.bytes_total,
                        percentage = stats.percentage,
                        "Transfer progress"
                    );
                }
            } else if options.verbose {
                debug!(line = %line, "rclone");
            }
        }
        // Close our end so a child still writing gets EPIPE instead of blocking.
        drop(lines);

        let status = child.wait().await.map_err(|e| {
            WorkflowError::new(
                ErrorKind::TransferError,
                RunState::Transfer,
                format!("failed to wait for rclone: {}", e),
            )
        })?;

        if !status.success() {
            return Err(WorkflowError::new(
                ErrorKind::TransferError,
                RunState::Transfer,
                format!("rclone copy exited with {}: {}", status, tracker.recent_lines()),
            ));
        }

        Ok(tracker.summary(options.dry_run))
    }

    async fn verify(
        &self,
        source: &str,
        dest: &str,
        options: VerifyOptions,
    ) -> Result<(), WorkflowError> {
        let mut args = vec!["check", source, dest];
        if options.one_way {
            args.push("--one-way");
        }
        if options.size_only {
            args.push("--size-only");
        }
        if options.verbose {
            args.push("-v");
        }

        let output = run_capture(&self.binary, &args).await.map_err(|e| {
            WorkflowError::new(ErrorKind::VerificationError, RunState::Verify, e.to_string())
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let detail = tail(&output.stderr, 5);
            warn!(detail = %detail, "rclone check reported differences");
            Err(WorkflowError::new(
                ErrorKind::VerificationError,
                RunState::Verify,
                format!("rclone check exited with {}: {}", output.status, detail),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatsLine {
    bytes_done: u64,
    bytes_total: u64,
    percentage: u8,
}

/// Accumulates what rclone prints on stderr during a copy.
#[derive(Default)]
struct CopyTracker {
    last_stats: Option<StatsLine>,
    dry_run_files: u64,
    dry_run_bytes: u64,
    recent: VecDeque<String>,
}

impl CopyTracker {
    const RECENT: usize = 5;

    fn observe(&mut self, line: &str) -> Option<StatsLine> {
        if !line.trim().is_empty() {
            if self.recent.len() == Self::RECENT {
                self.recent.pop_front();
            }
            self.recent.push_back(line.trim().to_string());
        }

        if let Some(size) = parse_dry_run_line(line) {
            self.dry_run_files += 1;
            self.dry_run_bytes += size;
            return None;
        }

        let stats = parse_stats_line(line)?;
        self.last_stats = Some(stats);
        Some(stats)
    }

    fn summary(&self, dry_run: bool) -> CopySummary {
        if dry_run {
            CopySummary {
                bytes: Some(self.dry_run_bytes),
                files: Some(self.dry_run_files),
                simulated: true,
            }
        } else {
            CopySummary {
                bytes: self.last_stats.map(|s| s.bytes_done),
                files: None,
                simulated: false,
            }
        }
    }

    fn recent_lines(&self) -> String {
        self.recent.iter().cloned().collect::<Vec<_>>().join(" | ")
    }
}

/// `NOTICE:    1.000 GiB / 4.000 GiB, 25%, 10.000 MiB/s, ETA 5m`
fn parse_stats_line(line: &str) -> Option<StatsLine> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"([\d.]+\s*[KMGTP]?i?B)\s*/\s*([\d.]+\s*[KMGTP]?i?B),\s*(\d+)%")
            .expect("valid regex")
    });

    let caps = re.captures(line)?;
    Some(StatsLine {
        bytes_done: parse_size(caps.get(1)?.as_str())?,
        bytes_total: parse_size(caps.get(2)?.as_str())?,
        percentage: caps.get(3)?.as_str().parse().ok()?,
    })
}

/// `NOTICE: DCIM/a.mp4: Skipped copy as --dry-run is set (size 100.500Mi)`
fn parse_dry_run_line(line: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"Skipped copy as --dry-run is set \(size ([\d.]+\s*[KMGTP]?i?B?)\)")
            .expect("valid regex")
    });

    let caps = re.captures(line)?;
    parse_size(caps.get(1)?.as_str())
}

/// Parse rclone's human sizes (`512`, `1.5Ki`, `3.000 GiB`). Units are binary.
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().ok()?;

    let unit = unit.trim().trim_end_matches('B').trim_end_matches('i');
    let multiplier: u64 = match unit {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        "P" => 1 << 50,
        _ => return None,
    };

    Some((value * multiplier as f64).round() as u64)
}

/// `rclone about --json` -> `free`, when the backend reports it.
fn parse_about_free(json: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value.get("free")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("0 B"), Some(0));
        assert_eq!(parse_size("1.5Ki"), Some(1536));
        assert_eq!(parse_size("2.000 MiB"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("1 GiB"), Some(1 << 30));
        assert_eq!(parse_size("12 parsecs"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn parses_one_line_stats() {
        let line = "2025/03/01 10:00:00 NOTICE:    1.000 GiB / 4.000 GiB, 25%, 10.000 MiB/s, ETA 5m";
        let stats = parse_stats_line(line).unwrap();
        assert_eq!(stats.bytes_done, 1 << 30);
        assert_eq!(stats.bytes_total, 4 << 30);
        assert_eq!(stats.percentage, 25);
        assert!(parse_stats_line("NOTICE: nothing to see").is_none());
    }

    #[test]
    fn dry_run_lines_are_tallied() {
        let mut tracker = CopyTracker::default();
        tracker.observe("NOTICE: DCIM/a.mp4: Skipped copy as --dry-run is set (size 1Mi)");
        tracker.observe("NOTICE: DCIM/b.mp4: Skipped copy as --dry-run is set (size 512)");
        tracker.observe("NOTICE: 0 B / 0 B, -, 0 B/s, ETA -");

        let summary = tracker.summary(true);
        assert!(summary.simulated);
        assert_eq!(summary.files, Some(2));
        assert_eq!(summary.bytes, Some(1024 * 1024 + 512));
    }

    #[test]
    fn real_copy_summary_uses_last_stats() {
        let mut tracker = CopyTracker::default();
        tracker.observe("NOTICE: 1 MiB / 2 MiB, 50%, 1 MiB/s, ETA 1s");
        tracker.observe("NOTICE: 2 MiB / 2 MiB, 100%, 1 MiB/s, ETA 0s");

        let summary = tracker.summary(false);
        assert!(!summary.simulated);
        assert_eq!(summary.bytes, Some(2 * 1024 * 1024));
    }

    #[test]
    fn recent_lines_are_bounded() {
        let mut tracker = CopyTracker::default();
        for i in 0..10 {
            tracker.observe(&format!("line {}", i));
        }
        assert_eq!(tracker.recent.len(), CopyTracker::RECENT);
        assert!(tracker.recent_lines().starts_with("line 5"));
    }

    #[test]
    fn about_free_field() {
        assert_eq!(
            parse_about_free(r#"{"total":1000,"used":400,"free":600}"#),
            Some(600)
        );
        assert_eq!(parse_about_free(r#"{"total":1000}"#), None);
        assert_eq!(parse_about_free("oops"), None);
    }

    #[tokio::test]
    async fn missing_binary_is_unreachable_not_an_error() {
        let gw = RcloneGateway::with_binary("definitely-not-rclone-4242");
        assert!(gw.ensure_tool().is_err());
        assert!(!gw.check_reachable("remote:x", Duration::from_secs(1)).await);
        assert_eq!(gw.query_free_space("remote:x").await, None);
    }

    #[tokio::test]
    async fn missing_binary_copy_is_tool_missing() {
        let gw = RcloneGateway::with_binary("definitely-not-rclone-4242");
        let options = CopyOptions {
            dry_run: true,
            verbose: false,
            progress_interval_secs: 1,
        };
        let err = gw.copy("/tmp", "remote:x", options).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolMissing);
    }
}
