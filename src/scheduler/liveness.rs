//! The liveness timer: checks due apps, restarts and reports dead ones.

use crate::core::{
    AgentSettings, MonitoredApplication, ProcessInspector, ProcessLauncher, Telemetry,
};
use crate::store::ConfigStore;
use arc_swap::ArcSwap;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What a liveness cycle found for one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Running,
    /// Dead and not configured for restart.
    Dead,
    Restarted { pid: u32 },
    RestartFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedApp {
    pub name: String,
    pub outcome: CheckOutcome,
}

/// When each app was last checked and what was seen.
#[derive(Debug, Default)]
struct LivenessLedger {
    last_checked: HashMap<String, Instant>,
    running: HashMap<String, bool>,
}

impl LivenessLedger {
    fn is_due(&self, app: &MonitoredApplication, now: Instant) -> bool {
        match self.last_checked.get(&app.name) {
            None => true,
            Some(last) => {
                now.saturating_duration_since(*last)
                    >= Duration::from_secs(app.checking_interval_seconds)
            }
        }
    }

    /// Forgets apps that are no longer in the list.
    fn retain(&mut self, apps: &[MonitoredApplication]) {
        self.last_checked
            .retain(|name, _| apps.iter().any(|app| &app.name == name));
        self.running
            .retain(|name, _| apps.iter().any(|app| &app.name == name));
    }
}

/// Checks monitored apps on the liveness tick, restarting and reporting dead ones.
pub struct LivenessMonitor {
    store: ConfigStore,
    settings: Arc<ArcSwap<AgentSettings>>,
    inspector: Arc<dyn ProcessInspector>,
    launcher: Arc<dyn ProcessLauncher>,
    telemetry: Arc<dyn Telemetry>,
    ledger: Mutex<LivenessLedger>,
}

impl LivenessMonitor {
    pub fn new(
        store: ConfigStore,
        settings: Arc<ArcSwap<AgentSettings>>,
        inspector: Arc<dyn ProcessInspector>,
        launcher: Arc<dyn ProcessLauncher>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            store,
            settings,
            inspector,
            launcher,
            telemetry,
            ledger: Mutex::new(LivenessLedger::default()),
        }
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, LivenessLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-reads both documents, then runs one cycle.
    pub async fn tick(&self) {
        match self.store.load_settings() {
            Ok(settings) => self.settings.store(Arc::new(settings)),
            Err(e) => warn!(error = %e, "Cannot re-read settings, keeping previous"),
        }
        let settings = self.settings.load_full();
        if !settings.app_settings.check_applications_enabled {
            debug!("Application checks are disabled");
            return;
        }

        let apps = match self.store.load_monitored_apps() {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "Cannot load monitored apps, skipping liveness cycle");
                return;
            }
        };
        self.run_cycle(apps, &settings, Instant::now()).await;
    }

    /// Checks every app in `apps` whose own interval has elapsed at `now`, in list order.
    pub async fn run_cycle(
        &self,
        apps: Vec<MonitoredApplication>,
        settings: &AgentSettings,
        now: Instant,
    ) -> Vec<CheckedApp> {
        let due: Vec<MonitoredApplication> = {
            let mut ledger = self.ledger();
            ledger.retain(&apps);
            apps.into_iter().filter(|app| ledger.is_due(app, now)).collect()
        };
        if due.is_empty() {
            return Vec::new();
        }

        let liveness = match self.query_liveness(&due).await {
            Some(liveness) => liveness,
            None => return Vec::new(),
        };

        let mut checked = Vec::with_capacity(due.len());
        for (mut app, alive) in due.into_iter().zip(liveness) {
            let outcome = self.check(&mut app, alive, settings).await;
            {
                let mut ledger = self.ledger();
                ledger.last_checked.insert(app.name.clone(), now);
                ledger.running.insert(app.name.clone(), app.is_running);
            }
            checked.push(CheckedApp {
                name: app.name,
                outcome,
            });
        }
        checked
    }

    /// Refreshes the process table and queries every app, on the blocking pool.
    async fn query_liveness(&self, apps: &[MonitoredApplication]) -> Option<Vec<bool>> {
        let inspector = self.inspector.clone();
        let names: Vec<String> = apps.iter().map(|app| app.name.clone()).collect();
        let queried = tokio::task::spawn_blocking(move || {
            inspector.refresh();
            names
                .iter()
                .map(|name| inspector.is_running(name))
                .collect::<Vec<bool>>()
        })
        .await;
        match queried {
            Ok(liveness) => Some(liveness),
            Err(e) => {
                warn!(error = %e, "Process table query failed, skipping liveness cycle");
                None
            }
        }
    }

    /// The liveness last observed for `name`, if it has been checked.
    pub fn last_known_state(&self, name: &str) -> Option<bool> {
        self.ledger().running.get(name).copied()
    }

    async fn check(
        &self,
        app: &mut MonitoredApplication,
        alive: bool,
        settings: &AgentSettings,
    ) -> CheckOutcome {
        debug!(app = %app.name, "Checking application");
        if alive {
            app.is_running = true;
            metrics::counter!("liveness_checks_total", "state" => "running").increment(1);
            return CheckOutcome::Running;
        }

        app.is_running = false;
        metrics::counter!("liveness_checks_total", "state" => "dead").increment(1);
        info!(app = %app.name, "Application is not running");

        let outcome = if app.auto_restart {
            self.restart(app).await
        } else {
            CheckOutcome::Dead
        };

        if settings.app_settings.send_notifications_enabled && !app.suppress_notifications {
            self.telemetry.notify_app_down(app).await;
        }
        outcome
    }

    async fn restart(&self, app: &mut MonitoredApplication) -> CheckOutcome {
        let attempt = AssertUnwindSafe(self.launcher.relaunch(app)).catch_unwind().await;
        match attempt {
            Ok(Ok(pid)) => {
                app.is_running = true;
                metrics::counter!("app_restarts_total", "outcome" => "success").increment(1);
                CheckOutcome::Restarted { pid }
            }
            Ok(Err(e)) => {
                metrics::counter!("app_restarts_total", "outcome" => "failure").increment(1);
                error!(app = %app.name, error = %e, "Failed to restart application");
                CheckOutcome::RestartFailed
            }
            Err(_) => {
                metrics::counter!("app_restarts_total", "outcome" => "failure").increment(1);
                error!(app = %app.name, "Restart attempt panicked");
                CheckOutcome::RestartFailed
            }
        }
    }
}
