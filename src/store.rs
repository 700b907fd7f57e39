//! Loading of the two on-disk JSON documents maintained by the CLI.
//!
//! Both files are re-read on every scheduler cycle, so edits take effect
//! without restarting the agent. The store never writes.

use crate::core::{AgentSettings, MonitoredApplication};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found at {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no user email configured in {}", path.display())]
    MissingIdentity { path: PathBuf },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitoredAppsDocument {
    #[serde(default)]
    monitored_apps: Option<Vec<MonitoredApplication>>,
}

/// Reads the settings and monitored-apps documents from fixed paths.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    settings_path: PathBuf,
    apps_path: PathBuf,
}

impl ConfigStore {
    pub fn new(settings_path: impl Into<PathBuf>, apps_path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            apps_path: apps_path.into(),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn apps_path(&self) -> &Path {
        &self.apps_path
    }

    pub fn load_settings(&self) -> Result<AgentSettings, ConfigError> {
        load_settings(&self.settings_path)
    }

    pub fn load_monitored_apps(&self) -> Result<Vec<MonitoredApplication>, ConfigError> {
        load_monitored_apps(&self.apps_path)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the agent settings.
///
/// Every failure is an error: a missing file, malformed JSON, an
/// out-of-range threshold or an empty user email would make the agent report
/// under the wrong identity, so the caller treats all of them as fatal.
pub fn load_settings(path: &Path) -> Result<AgentSettings, ConfigError> {
    let json = read(path)?;
    let settings: AgentSettings =
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if settings.user.email.trim().is_empty() {
        return Err(ConfigError::MissingIdentity {
            path: path.to_path_buf(),
        });
    }
    Ok(settings)
}

/// Loads the monitored application list.
///
/// A missing file is an error. Malformed JSON yields an empty list. Entries
/// with an empty name are dropped, and duplicate names keep the first entry.
pub fn load_monitored_apps(path: &Path) -> Result<Vec<MonitoredApplication>, ConfigError> {
    let json = read(path)?;
    let document: MonitoredAppsDocument = match serde_json::from_str(&json) {
        Ok(document) => document,
        Err(e) => {
            error!(
                path = %path.display(),
                error = %e,
                "Malformed monitored apps file, monitoring nothing this cycle"
            );
            return Ok(Vec::new());
        }
    };

    let mut seen = HashSet::new();
    let apps = document
        .monitored_apps
        .unwrap_or_default()
        .into_iter()
        .filter(|app| {
            if app.name.trim().is_empty() {
                warn!(path = %path.display(), "Ignoring monitored app without a name");
                return false;
            }
            if !seen.insert(app.name.clone()) {
                warn!(app = %app.name, "Ignoring duplicate monitored app entry");
                return false;
            }
            true
        })
        .collect();
    Ok(apps)
}
