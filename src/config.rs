//! Layered configuration.
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional
//! TOML file, `CARDSAFE_*` environment variables, command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::format::FsType;

pub const ENV_PREFIX: &str = "CARDSAFE_";
pub const CONFIG_ENV: &str = "CARDSAFE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cardsafe/config.toml";

/// Keys whose environment values are always strings.
const STRING_KEYS: &[&str] = &[
    "source",
    "dest",
    "fs_type",
    "label",
    "marker_dir",
    "lock_path",
    "log_file",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: PathBuf,
    pub dest: String,
    pub fs_type: String,
    pub label: String,
    pub dry_run: bool,
    pub auto_confirm: bool,
    pub verbose: bool,
    /// Subdirectory expected on the right card (dashcams write `DCIM`).
    pub marker_dir: String,
    pub lock_path: PathBuf,
    pub log_file: PathBuf,
    pub reachability_timeout_secs: u64,
    pub progress_interval_secs: u64,
    pub json_logs: bool,
    pub simulation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            dest: "remote:dashcam-backups".to_string(),
            fs_type: FsType::ExFat.as_str().to_string(),
            label: "NO NAME".to_string(),
            dry_run: false,
            auto_confirm: false,
            verbose: false,
            marker_dir: "DCIM".to_string(),
            lock_path: default_lock_path(),
            log_file: default_log_file(),
            reachability_timeout_secs: 30,
            progress_interval_secs: 30,
            json_logs: false,
            simulation: false,
        }
    }
}

impl AppConfig {
    /// Merge defaults, config file, environment and (optionally) CLI args.
    ///
    /// `args` must serialize only the flags the operator actually passed.
    pub fn new<T: Serialize>(args: Option<&T>) -> Result<Self> {
        let config_path =
            std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut ignored = vec!["config"];
        ignored.extend_from_slice(STRING_KEYS);

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&ignored));

        // Env values are otherwise parsed as TOML scalars, turning a label
        // like `2024` or `007` into a number. Take these keys verbatim.
        for key in STRING_KEYS {
            let var = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                figment = figment.merge(Serialized::global(key, value));
            }
        }

        if let Some(args) = args {
            figment = figment.merge(Serialized::globals(args));
        }

        Ok(figment.extract()?)
    }

    /// Validate into the immutable view the workflow runs on.
    pub fn run_config(&self) -> Result<RunConfig> {
        let fs_type = FsType::parse(&self.fs_type)?;

        if self.label.is_empty() {
            bail!("volume label must not be empty");
        }
        if self.label.chars().count() > fs_type.max_label_len() {
            bail!(
                "label '{}' is longer than the {} characters {} allows",
                self.label,
                fs_type.max_label_len(),
                fs_type
            );
        }
        if self.dest.trim().is_empty() {
            bail!("destination must not be empty");
        }

        Ok(RunConfig {
            source: self.source.clone(),
            dest: self.dest.clone(),
            fs_type,
            label: self.label.clone(),
            dry_run: self.dry_run,
            auto_confirm: self.auto_confirm,
            verbose: self.verbose,
            marker_dir: self.marker_dir.clone(),
            lock_path: self.lock_path.clone(),
            reachability_timeout: Duration::from_secs(self.reachability_timeout_secs.max(1)),
            progress_interval_secs: self.progress_interval_secs,
        })
    }
}

/// Validated, immutable settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub source: PathBuf,
    pub dest: String,
    pub fs_type: FsType,
    pub label: String,
    pub dry_run: bool,
    pub auto_confirm: bool,
    pub verbose: bool,
    pub marker_dir: String,
    pub lock_path: PathBuf,
    pub reachability_timeout: Duration,
    pub progress_interval_secs: u64,
}

impl RunConfig {
    pub fn source_str(&self) -> String {
        self.source.to_string_lossy().into_owned()
    }
}

fn default_source() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Volumes/NO NAME")
    } else {
        PathBuf::from("/media/NO NAME")
    }
}

fn default_lock_path() -> PathBuf {
    // Not $TMPDIR: on macOS that is per user and the lock must be system wide.
    if cfg!(unix) {
        PathBuf::from("/tmp/cardsafe.lock")
    } else {
        std::env::temp_dir().join("cardsafe.lock")
    }
}

fn default_log_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join("cardsafe.log"),
        _ => std::env::temp_dir().join("cardsafe.log"),
    }
}
