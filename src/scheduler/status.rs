//! The status timer: reports every monitored app's state in one batch.

use crate::core::{AppStatusReport, MonitoredApplication, ProcessInspector, Telemetry};
use crate::store::ConfigStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Reports the liveness and usage of every monitored app on each status tick.
pub struct StatusReporter {
    store: ConfigStore,
    inspector: Arc<dyn ProcessInspector>,
    telemetry: Arc<dyn Telemetry>,
}

impl StatusReporter {
    pub fn new(
        store: ConfigStore,
        inspector: Arc<dyn ProcessInspector>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            store,
            inspector,
            telemetry,
        }
    }

    pub async fn tick(&self) {
        let apps = match self.store.load_monitored_apps() {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "Cannot load monitored apps, skipping status report");
                return;
            }
        };

        let inspector = self.inspector.clone();
        let collected =
            tokio::task::spawn_blocking(move || build_reports(inspector.as_ref(), &apps)).await;
        let reports = match collected {
            Ok(reports) => reports,
            Err(e) => {
                warn!(error = %e, "Status collection task failed");
                return;
            }
        };
        self.telemetry.send_app_statuses(&reports).await;
    }
}

/// Builds one report per app, in list order, from a single process-table refresh.
pub fn build_reports(
    inspector: &dyn ProcessInspector,
    apps: &[MonitoredApplication],
) -> Vec<AppStatusReport> {
    if apps.is_empty() {
        return Vec::new();
    }
    inspector.refresh();
    let now = Utc::now();
    apps.iter()
        .map(|app| {
            let is_running = inspector.is_running(&app.name);
            let usage = if is_running {
                inspector.usage(&app.name).unwrap_or_default()
            } else {
                Default::default()
            };
            AppStatusReport {
                app_name: app.name.clone(),
                cpu_usage_percent: usage.cpu_percent,
                memory_usage_percent: usage.memory_percent,
                is_running,
                last_checked: now,
            }
        })
        .collect()
}
