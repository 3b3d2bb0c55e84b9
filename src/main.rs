use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use cardsafe::adapters::{self, SimulatedHost, SimulationPlan};
use cardsafe::core::{Orchestrator, Platform, WorkflowError};
use cardsafe::{config, context, logging};
use clap::Parser;
use clap::error::ErrorKind as ClapErrorKind;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "cardsafe")]
#[command(
    about = "Back up a dashcam SD card to a remote, verify it, then reformat the card",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    args: RunArgs,
}

/// Flags that override config. Unset flags are not serialized, so they
/// never mask an environment or file value.
#[derive(clap::Args, Serialize)]
struct RunArgs {
    /// Mounted card to back up
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// rclone destination
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long, value_name = "REMOTE:PATH")]
    dest: Option<String>,

    /// Filesystem to reformat the card with (exFAT or FAT32)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long, value_name = "FS")]
    fs_type: Option<String>,

    /// Volume label for the reformatted card
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long, value_name = "LABEL")]
    label: Option<String>,

    /// Show what would be copied; never unmount or format
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Answer yes to every prompt
    #[serde(rename = "auto_confirm", skip_serializing_if = "std::ops::Not::not")]
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(short, long)]
    verbose: bool,

    /// Append-only log file
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, hide = true)]
    json_logs: bool,

    /// Drive in-memory gateways instead of a real card and remote
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, hide = true)]
    simulation: bool,
}

#[tokio::main]
async fn main() {
    let code = run().await;
    // A pending stdin read on a blocking thread must not keep us alive.
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => 0,
                _ => 1,
            };
        }
    };

    let config = match config::AppConfig::new(Some(&cli.args)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cardsafe: invalid configuration: {:#}", e);
            return 1;
        }
    };

    if let Err(e) = logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: Some(config.log_file.clone()),
    }) {
        eprintln!("cardsafe: {:#}", e);
        return 1;
    }

    match execute(config).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<WorkflowError>() {
                Some(wf) => error!(kind = %wf.kind, step = %wf.step, "{}", wf),
                None => error!("{:#}", e),
            }
            1
        }
    }
}

async fn execute(config: config::AppConfig) -> Result<i32> {
    let run_config = config.run_config()?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_for_interrupt(cancel.clone()));

    let platform = Platform::detect();
    let gateways = if config.simulation {
        warn!("Simulation mode: no real card or remote will be touched");
        let plan = SimulationPlan {
            copy_delay: Duration::from_secs(2),
            format_delay: Duration::from_secs(1),
            ..Default::default()
        };
        adapters::get_simulated_gateways(platform, SimulatedHost::new(plan))
    } else {
        adapters::get_gateways(platform)
    };

    let ctx = context::AppContext::with_cancel(run_config, cancel);
    let outcome = Orchestrator::new(ctx, gateways).run().await;
    Ok(outcome.exit_code())
}

async fn watch_for_interrupt(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    warn!("Interrupt received, cancelling run");
    cancel.cancel();
}
