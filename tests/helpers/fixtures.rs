#![allow(dead_code)]
//! Settings and monitored-apps documents written to a temporary directory.

use serde_json::{json, Value};
use spyserv::config::Config;
use spyserv::store::ConfigStore;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestFiles {
    pub dir: TempDir,
    pub settings: PathBuf,
    pub apps: PathBuf,
}

impl TestFiles {
    pub fn new(settings: Value, apps: Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let files = Self {
            settings: dir.path().join("appsettings.json"),
            apps: dir.path().join("monitored-apps.json"),
            dir,
        };
        files.write_settings(settings);
        files.write_apps(apps);
        files
    }

    pub fn write_settings(&self, settings: Value) {
        std::fs::write(&self.settings, settings.to_string()).unwrap();
    }

    pub fn write_apps(&self, apps: Value) {
        std::fs::write(&self.apps, json!({ "monitoredApps": apps }).to_string()).unwrap();
    }

    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(&self.settings, &self.apps)
    }

    /// A runtime config pointing at these files, with a log dir inside the temp dir.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.paths.settings = self.settings.clone();
        config.paths.monitored_apps = self.apps.clone();
        config.paths.log_dir = self.dir.path().join("logs");
        config.schedule.metrics_interval_secs = 1;
        config.schedule.status_interval_secs = 1;
        config.schedule.shutdown_grace_secs = 5;
        config
    }
}

/// A settings document with every feature on and a 1 s liveness period.
pub fn settings_json() -> Value {
    json!({
        "appSettings": {
            "checkApplicationsStatus": true,
            "sendMonitoringData": true,
            "sendNotifications": true,
            "softExiting": true,
            "monitoringInterval": 1,
            "enableLogging": true
        },
        "resMonSettings": {
            "monitorCpuUsage": true,
            "monitorMemoryUsage": true,
            "monitorDiskUsage": true,
            "cpuUsageThreshold": 80,
            "memoryUsageThreshold": 90,
            "diskUsageThreshold": 90
        },
        "user": { "name": "Ann", "email": "ann@example.com" }
    })
}

/// `settings_json` with one `appSettings` key replaced.
pub fn settings_with(key: &str, value: Value) -> Value {
    let mut settings = settings_json();
    settings["appSettings"][key] = value;
    settings
}

pub fn app_json(name: &str, checking_interval: u64) -> Value {
    json!({ "name": name, "checkingIntervalInSec": checking_interval })
}

pub fn restartable_app_json(name: &str) -> Value {
    json!({ "name": name, "checkingIntervalInSec": 1, "autoRestart": true })
}
