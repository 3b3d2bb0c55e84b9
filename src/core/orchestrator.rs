//! Backup-then-reformat state machine.
//!
//! START -> PREFLIGHT -> TRANSFER -> VERIFY -> CONFIRM -> UNMOUNT -> FORMAT -> DONE
//!
//! FORMAT is only reachable through that exact path with a successful copy,
//! a successful verify, `dry_run == false` and an affirmative confirmation.
//! Any other outcome ends the run in FAILED or ABORTED before the format
//! gateway is touched. Nothing is retried.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::context::AppContext;
use crate::core::device::{DeviceResolver, Platform};
use crate::core::error::{ErrorKind, WorkflowError};
use crate::core::format::FormatGateway;
use crate::core::lock::RunLock;
use crate::core::models::{
    DeviceHandle, PreflightResult, RunOutcome, RunReport, RunState, TransferOutcome,
};
use crate::core::preflight;
use crate::core::prompt::Prompter;
use crate::core::remote::{CopyOptions, RemoteGateway, VerifyOptions};

/// External collaborators the workflow drives.
#[derive(Clone)]
pub struct Gateways {
    pub platform: Platform,
    pub resolver: Arc<dyn DeviceResolver>,
    pub remote: Arc<dyn RemoteGateway>,
    pub formatter: Arc<dyn FormatGateway>,
    pub prompter: Arc<dyn Prompter>,
}

impl From<WorkflowError> for RunOutcome {
    fn from(e: WorkflowError) -> Self {
        RunOutcome::Failed(e)
    }
}

type Step<T> = Result<T, RunOutcome>;

/// What the run learned so far, for the final report.
struct Progress {
    state: RunState,
    preflight: PreflightResult,
    transfer: TransferOutcome,
    device: Option<DeviceHandle>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: RunState::Start,
            preflight: PreflightResult::default(),
            transfer: TransferOutcome::default(),
            device: None,
        }
    }

    fn enter(&mut self, next: RunState) {
        debug_assert!(!self.state.is_terminal(), "no transitions out of {}", self.state);
        info!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

pub struct Orchestrator {
    ctx: AppContext,
    gateways: Gateways,
}

impl Orchestrator {
    pub fn new(ctx: AppContext, gateways: Gateways) -> Self {
        Self { ctx, gateways }
    }

    /// Run the whole workflow once. The run lock is held for the duration
    /// and released before this returns, whatever the outcome.
    pub async fn run(&self) -> RunOutcome {
        let span = info_span!("run", run_id = %self.ctx.run_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> RunOutcome {
        let config = &self.ctx.config;
        let started_at = Utc::now();
        let mut progress = Progress::new();

        info!(
            source = %config.source.display(),
            dest = %config.dest,
            fs_type = %config.fs_type,
            label = %config.label,
            dry_run = config.dry_run,
            auto_confirm = config.auto_confirm,
            platform = %self.gateways.platform,
            "Starting backup run"
        );

        let outcome = match RunLock::acquire(&config.lock_path) {
            Ok(lock) => {
                let outcome = match self.drive(&mut progress).await {
                    Ok(()) => RunOutcome::Done,
                    Err(stop) => stop,
                };
                lock.release();
                outcome
            }
            Err(e) => RunOutcome::Failed(e),
        };

        self.log_outcome(&outcome);

        let report = RunReport {
            run_id: self.ctx.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            final_state: outcome.final_state(),
            error_kind: outcome.error_kind().map(|k| k.to_string()),
            dry_run: config.dry_run,
            preflight: progress.preflight,
            transfer: progress.transfer,
            device: progress.device,
        };
        match serde_json::to_string(&report) {
            Ok(json) => info!(report = %json, "Run finished"),
            Err(e) => warn!(error = %e, "Failed to serialize run report"),
        }

        outcome
    }

    async fn drive(&self, progress: &mut Progress) -> Step<()> {
        let config = Arc::clone(&self.ctx.config);

        progress.enter(RunState::Preflight);
        progress.preflight = self.guarded(RunState::Preflight, self.preflight()).await?;

        progress.enter(RunState::Transfer);
        self.guarded(RunState::Transfer, self.transfer()).await?;
        progress.transfer.copy_succeeded = true;

        if config.dry_run {
            info!("Dry run: stopping before verification, nothing will be unmounted or formatted");
            progress.enter(RunState::Done);
            return Ok(());
        }

        progress.enter(RunState::Verify);
        self.guarded(RunState::Verify, self.verify()).await?;
        progress.transfer.verify_succeeded = true;

        progress.enter(RunState::Confirm);
        self.guarded(RunState::Confirm, self.confirm_erase()).await?;

        // Everything past this point is destructive.
        debug_assert!(progress.transfer.copy_succeeded && progress.transfer.verify_succeeded);

        // Resolving is read-only, so an interrupt here is still a safe stop.
        let device = self.guarded(RunState::Confirm, self.resolve_device()).await?;
        progress.device = Some(device.clone());

        progress.enter(RunState::Unmount);
        self.guarded(RunState::Unmount, self.unmount(&device)).await?;

        progress.enter(RunState::Format);
        self.guarded(RunState::Format, self.format(&device)).await?;

        progress.enter(RunState::Done);
        Ok(())
    }

    /// Race a step against operator cancellation.
    async fn guarded<T>(&self, state: RunState, step: impl Future<Output = Step<T>>) -> Step<T> {
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(RunOutcome::Interrupted { step: state }),
            result = step => result,
        }
    }

    async fn preflight(&self) -> Step<PreflightResult> {
        let config = &self.ctx.config;
        let gw = &self.gateways;
        let at = |e: WorkflowError| e.at(RunState::Preflight);
        let mut result = PreflightResult::default();

        gw.platform.ensure_supported().map_err(at)?;
        gw.remote.ensure_tool().map_err(at)?;
        if !config.dry_run {
            gw.formatter.ensure_tool(config.fs_type).map_err(at)?;
        }

        preflight::check_source(&config.source).map_err(at)?;
        result.source_exists = true;

        result.has_expected_marker_dir = preflight::has_marker_dir(&config.source, &config.marker_dir);
        if !result.has_expected_marker_dir {
            warn!(
                source = %config.source.display(),
                marker = %config.marker_dir,
                "Expected marker directory not found; this may not be the right card"
            );
            if config.auto_confirm {
                info!("Continuing without marker directory (auto-confirm)");
            } else {
                let question = format!(
                    "'{}' not found on {}. Continue anyway?",
                    config.marker_dir,
                    config.source.display()
                );
                if !self.ask(&question).await {
                    return Err(RunOutcome::Aborted {
                        step: RunState::Preflight,
                        reason: "operator declined to continue without marker directory".into(),
                    });
                }
            }
        }

        result.remote_reachable = gw
            .remote
            .check_reachable(&config.dest, config.reachability_timeout)
            .await;
        if !result.remote_reachable {
            return Err(WorkflowError::new(
                ErrorKind::RemoteUnreachable,
                RunState::Preflight,
                format!(
                    "{} did not answer within {}s",
                    config.dest,
                    config.reachability_timeout.as_secs()
                ),
            )
            .into());
        }
        info!(dest = %config.dest, "Remote is reachable");

        match gw.remote.query_free_space(&config.dest).await {
            None => warn!(dest = %config.dest, "Could not determine free space at destination; skipping capacity check"),
            Some(available) => match preflight::source_size(&config.source).await {
                Ok(required) => {
                    let check = preflight::check_capacity(required, available).map_err(at)?;
                    info!(
                        required_bytes = check.required_bytes,
                        available_bytes = check.available_bytes,
                        "Capacity check passed"
                    );
                    result.capacity_check = Some(check);
                }
                Err(e) => warn!(error = %e, "Could not size source; skipping capacity check"),
            },
        }

        Ok(result)
    }

    async fn transfer(&self) -> Step<()> {
        let config = &self.ctx.config;
        let options = CopyOptions {
            dry_run: config.dry_run,
            verbose: config.verbose,
            progress_interval_secs: config.progress_interval_secs,
        };

        info!(dry_run = config.dry_run, "Copying card to destination");
        let summary = self
            .gateways
            .remote
            .copy(&config.source_str(), &config.dest, options)
            .await
            .map_err(|e| e.at(RunState::Transfer))?;

        if summary.simulated {
            info!(
                would_copy_bytes = ?summary.bytes,
                would_copy_files = ?summary.files,
                "Simulated copy complete; destination untouched"
            );
        } else {
            info!(bytes = ?summary.bytes, files = ?summary.files, "Copy complete");
        }
        Ok(())
    }

    async fn verify(&self) -> Step<()> {
        let config = &self.ctx.config;
        let options = VerifyOptions {
            one_way: true,
            size_only: true,
            verbose: config.verbose,
        };

        info!("Verifying destination (one-way, size only)");
        self.gateways
            .remote
            .verify(&config.source_str(), &config.dest, options)
            .await
            .map_err(|e| e.at(RunState::Verify))?;
        info!("Verification passed");
        Ok(())
    }

    async fn confirm_erase(&self) -> Step<()> {
        let config = &self.ctx.config;
        if config.auto_confirm {
            info!("Erase confirmed (auto-confirm)");
            return Ok(());
        }

        let question = format!(
            "WARNING: {} will be unmounted and ERASED as {} '{}'. All data on the card will be lost. Proceed?",
            config.source.display(),
            config.fs_type,
            config.label
        );
        if self.ask(&question).await {
            info!("Erase confirmed by operator");
            Ok(())
        } else {
            Err(RunOutcome::Aborted {
                step: RunState::Confirm,
                reason: "operator declined to erase the card".into(),
            })
        }
    }

    async fn resolve_device(&self) -> Step<DeviceHandle> {
        let mount_path = self.ctx.config.source_str();
        let handle = self
            .gateways
            .resolver
            .resolve(&mount_path)
            .await
            .map_err(|e| e.at(RunState::Unmount))?;
        info!(mount = %handle.mount_path, device = %handle.device_identifier, "Resolved block device");
        Ok(handle)
    }

    async fn unmount(&self, device: &DeviceHandle) -> Step<()> {
        self.gateways
            .formatter
            .unmount(device)
            .await
            .map_err(|e| e.at(RunState::Unmount))?;
        info!(device = %device.device_identifier, "Unmounted");
        Ok(())
    }

    async fn format(&self, device: &DeviceHandle) -> Step<()> {
        let config = &self.ctx.config;
        info!(
            device = %device.device_identifier,
            fs_type = %config.fs_type,
            label = %config.label,
            "Formatting card"
        );
        self.gateways
            .formatter
            .format(&device.device_identifier, config.fs_type, &config.label)
            .await
            .map_err(|e| e.at(RunState::Format))?;
        info!(device = %device.device_identifier, "Format complete");
        Ok(())
    }

    /// A prompt that cannot be answered counts as "no".
    async fn ask(&self, question: &str) -> bool {
        match self.gateways.prompter.confirm(question).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Could not read operator answer; treating as no");
                false
            }
        }
    }

    fn log_outcome(&self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Done => info!("Run complete"),
            RunOutcome::Failed(e) => {
                error!(kind = %e.kind, step = %e.step, "Run failed: {}", e);
            }
            RunOutcome::Aborted { step, reason } => {
                warn!(kind = %ErrorKind::OperatorAborted, step = %step, "Run aborted: {}", reason);
            }
            RunOutcome::Interrupted { step } => {
                if step.is_physically_unsafe() {
                    error!(
                        kind = %ErrorKind::Interrupted,
                        step = %step,
                        "INTERRUPTED DURING {}: the card may be left unmounted or only partially formatted. \
                         The backup was verified; reformat the card manually before reuse.",
                        step
                    );
                } else {
                    warn!(kind = %ErrorKind::Interrupted, step = %step, "Run interrupted; card left untouched");
                }
            }
        }
        debug!(exit_code = outcome.exit_code(), "Exit code");
    }
}
