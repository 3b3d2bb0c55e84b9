//! Drives `RcloneGateway` against a scripted stand-in for the rclone binary.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cardsafe::adapters::RcloneGateway;
use cardsafe::core::{CopyOptions, ErrorKind, RemoteGateway, VerifyOptions};
use tempfile::{TempDir, tempdir};

/// Write an executable `rclone` script whose body runs after the arguments
/// are appended to `args.log` in the same directory.
fn fake_rclone(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("rclone");
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> \"{}\"\n{}\n",
        dir.join("args.log").display(),
        body
    );
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn gateway(body: &str) -> (TempDir, RcloneGateway) {
    let dir = tempdir().unwrap();
    let bin = fake_rclone(dir.path(), body);
    (dir, RcloneGateway::with_binary(bin.to_string_lossy()))
}

fn args_log(dir: &TempDir) -> String {
    std::fs::read_to_string(dir.path().join("args.log")).unwrap_or_default()
}

fn copy_options(dry_run: bool) -> CopyOptions {
    CopyOptions {
        dry_run,
        verbose: false,
        progress_interval_secs: 1,
    }
}

#[tokio::test]
async fn copy_reports_last_stats_line() {
    let (dir, rclone) = gateway(
        r#"
echo "NOTICE:    1.000 MiB / 4.000 MiB, 25%, 1.000 MiB/s, ETA 3s" >&2
echo "NOTICE:    4.000 MiB / 4.000 MiB, 100%, 1.000 MiB/s, ETA 0s" >&2
exit 0"#,
    );

    let summary = rclone
        .copy("/media/card", "remote:backups", copy_options(false))
        .await
        .unwrap();

    assert!(!summary.simulated);
    assert_eq!(summary.bytes, Some(4 * 1024 * 1024));

    let args = args_log(&dir);
    assert!(args.starts_with("copy /media/card remote:backups"));
    assert!(args.contains("--stats-one-line"));
    assert!(!args.contains("--dry-run"));
}

#[tokio::test]
async fn dry_run_copy_tallies_skipped_files() {
    let (dir, rclone) = gateway(
        r#"
echo "NOTICE: DCIM/a.mp4: Skipped copy as --dry-run is set (size 1Mi)" >&2
echo "NOTICE: DCIM/b.mp4: Skipped copy as --dry-run is set (size 2Mi)" >&2
exit 0"#,
    );

    let summary = rclone
        .copy("/media/card", "remote:backups", copy_options(true))
        .await
        .unwrap();

    assert!(summary.simulated);
    assert_eq!(summary.files, Some(2));
    assert_eq!(summary.bytes, Some(3 * 1024 * 1024));
    assert!(args_log(&dir).contains("--dry-run"));
}

#[tokio::test]
async fn failed_copy_carries_recent_output() {
    let (_dir, rclone) = gateway(
        r#"
echo "ERROR : DCIM/a.mp4: Failed to copy: quota exceeded" >&2
exit 3"#,
    );

    let err = rclone
        .copy("/media/card", "remote:backups", copy_options(false))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::TransferError);
    assert!(err.message.contains("quota exceeded"));
}

#[tokio::test]
async fn verify_is_one_way_size_only() {
    let (dir, rclone) = gateway("exit 0");

    rclone
        .verify(
            "/media/card",
            "remote:backups",
            VerifyOptions {
                one_way: true,
                size_only: true,
                verbose: false,
            },
        )
        .await
        .unwrap();

    let args = args_log(&dir);
    assert!(args.starts_with("check /media/card remote:backups"));
    assert!(args.contains("--one-way"));
    assert!(args.contains("--size-only"));
}

#[tokio::test]
async fn verify_mismatch_is_verification_error() {
    let (_dir, rclone) = gateway(
        r#"
echo "ERROR : DCIM/a.mp4: sizes differ" >&2
exit 1"#,
    );

    let err = rclone
        .verify(
            "/media/card",
            "remote:backups",
            VerifyOptions {
                one_way: true,
                size_only: true,
                verbose: false,
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::VerificationError);
    assert!(err.message.contains("sizes differ"));
}

#[tokio::test]
async fn reachability_lists_remote_root() {
    let (dir, rclone) = gateway("exit 0");
    assert!(
        rclone
            .check_reachable("remote:dashcam/backups", Duration::from_secs(5))
            .await
    );
    assert!(args_log(&dir).starts_with("lsd remote: --max-depth 1"));
}

#[tokio::test]
async fn slow_remote_counts_as_unreachable() {
    let (_dir, rclone) = gateway("sleep 5");
    assert!(
        !rclone
            .check_reachable("remote:backups", Duration::from_millis(200))
            .await
    );
}

#[tokio::test]
async fn free_space_from_about_json() {
    let (_dir, rclone) = gateway(r#"echo '{"total": 1000, "used": 400, "free": 600}'"#);
    assert_eq!(rclone.query_free_space("remote:backups").await, Some(600));

    let (_dir, rclone) = gateway("echo 'about not supported' >&2; exit 1");
    assert_eq!(rclone.query_free_space("remote:backups").await, None);
}

#[tokio::test]
async fn copy_keeps_reading_past_undecodable_output() {
    // Well over a pipe buffer's worth of stderr after a non-UTF-8 line.
    let (_dir, rclone) = gateway(
        r#"
printf 'NOTICE: DCIM/\377bad.mp4: Skipped copy as --dry-run is set (size 1Ki)\n' >&2
i=0
while [ $i -lt 3999 ]; do
  echo "NOTICE: DCIM/clip$i.mp4: Skipped copy as --dry-run is set (size 1Ki)" >&2
  i=$((i + 1))
done
exit 0"#,
    );

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        rclone.copy("/media/card", "remote:backups", copy_options(true)),
    )
    .await
    .expect("copy must finish once rclone exits")
    .unwrap();

    assert_eq!(summary.files, Some(4000));
    assert_eq!(summary.bytes, Some(4000 * 1024));
}
