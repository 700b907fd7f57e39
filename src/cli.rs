//! Command-Line Interface (CLI) argument parsing.
//!
//! The flags are parsed with `clap` and merged as the last `figment` layer,
//! so they override the TOML file and `SPYSERV_` environment variables.

use clap::Parser;
use figment::{
    providers::Serialized,
    value::{Dict, Map},
    Error, Figment, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Monitors local applications and relays system telemetry to the spyserv backend.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML file with runtime configuration.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the settings document (appsettings.json).
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Path to the monitored-apps document.
    #[arg(long, value_name = "FILE")]
    pub apps: Option<PathBuf>,

    /// Directory for the rolling log file.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Base URL of the backend, e.g. http://localhost.
    #[arg(long, value_name = "URL")]
    pub backend_url: Option<String>,

    /// Name to register this device under.
    #[arg(long, value_name = "NAME")]
    pub device_name: Option<String>,

    /// Log level or filter directive.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Periodically log internal counters.
    #[arg(long)]
    pub log_metrics: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut figment = Figment::new();

        if let Some(path) = &self.settings {
            figment = figment.merge(Serialized::default("paths.settings", path));
        }
        if let Some(path) = &self.apps {
            figment = figment.merge(Serialized::default("paths.monitored_apps", path));
        }
        if let Some(dir) = &self.log_dir {
            figment = figment.merge(Serialized::default("paths.log_dir", dir));
        }
        if let Some(url) = &self.backend_url {
            figment = figment.merge(Serialized::default("backend.base_url", url));
        }
        if let Some(name) = &self.device_name {
            figment = figment.merge(Serialized::default("backend.device_name", name));
        }
        if let Some(level) = &self.log_level {
            figment = figment.merge(Serialized::default("log_level", level));
        }
        // Only an explicit flag overrides; its absence keeps the lower layers.
        if self.log_metrics {
            figment = figment.merge(Serialized::default("metrics.log_metrics", true));
        }

        figment.data()
    }
}
