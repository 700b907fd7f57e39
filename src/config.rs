//! Runtime configuration for the spyserv agent
//!
//! This module defines the agent's own knobs: where the CLI-owned JSON
//! documents live, how to reach the backend and how often the timers fire.
//! It uses `figment` to layer built-in defaults, an optional TOML file,
//! `SPYSERV_` environment variables and command-line flags.
//!
//! The user-facing settings (feature toggles, thresholds, identity) are not
//! part of this struct; they are read from `appsettings.json` by the store.

use crate::cli::Cli;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The main configuration struct for the agent.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// The logging level (an `EnvFilter` directive).
    pub log_level: String,
    /// Locations of the files the agent reads and writes.
    pub paths: PathsConfig,
    /// Backend endpoint and request policy.
    pub backend: BackendConfig,
    /// Timer periods.
    pub schedule: ScheduleConfig,
    /// Internal metrics reporting.
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            paths: PathsConfig::default(),
            backend: BackendConfig::default(),
            schedule: ScheduleConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// The settings document written by the CLI.
    pub settings: PathBuf,
    /// The monitored-apps document written by the CLI.
    pub monitored_apps: PathBuf,
    /// Directory for the daily rolling log file.
    pub log_dir: PathBuf,
    pub log_file_prefix: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            settings: PathBuf::from("../src/appsettings.json"),
            monitored_apps: PathBuf::from("../src/monitored-apps.json"),
            log_dir: PathBuf::from("../logs"),
            log_file_prefix: "spyserv-service.log".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    /// Scheme and host of the backend. Endpoints live under `/api/m/`.
    pub base_url: String,
    /// The name this device registers under. Defaults to the host name.
    pub device_name: Option<String>,
    /// Cookie the backend reads the auth token from.
    pub auth_cookie_name: String,
    pub request_timeout_secs: u64,
    /// Attempts per metrics submission before the sample is dropped.
    pub metrics_attempts: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            device_name: None,
            auth_cookie_name: "homka-lox".to_string(),
            request_timeout_secs: 10,
            metrics_attempts: 3,
        }
    }
}

impl BackendConfig {
    /// The configured device name, else the OS host name, else `"unknown"`.
    pub fn resolve_device_name(&self) -> String {
        self.device_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub metrics_interval_secs: u64,
    pub status_interval_secs: u64,
    /// How long a soft exit waits for in-flight ticks.
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 5,
            status_interval_secs: 3,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    /// Periodically log the agent's internal counters.
    pub log_metrics: bool,
    pub log_aggregation_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            log_metrics: false,
            log_aggregation_seconds: 60,
        }
    }
}

impl Config {
    /// Loads the configuration, with `cli` as the highest-priority layer.
    ///
    /// A `--config` file that does not exist is an error; without the flag
    /// only defaults, environment and flags apply.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = &cli.config {
            if !path.exists() {
                bail!("configuration file not found at {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: Config = figment
            // e.g. SPYSERV_BACKEND__BASE_URL=http://monitor.local
            .merge(Env::prefixed("SPYSERV_").split("__"))
            .merge(cli.clone())
            .extract()?;
        Ok(config)
    }
}
