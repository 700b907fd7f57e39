//! # Monitoring Scheduler
//!
//! Three independent timers drive the agent:
//!
//! - **metrics** (`schedule.metrics_interval_secs`): sample resources and push
//!   a snapshot.
//! - **status** (`schedule.status_interval_secs`): push the liveness and usage
//!   of every monitored app.
//! - **liveness** (`appSettings.monitoringInterval`): check apps whose own
//!   interval has elapsed, restart and report dead ones.
//!
//! Every timer runs through [`ticker::run_periodic`], so a slow tick only ever
//! delays its own timer.

pub mod liveness;
pub mod resources;
pub mod status;
pub mod ticker;

pub use liveness::{CheckOutcome, CheckedApp, LivenessMonitor};
pub use resources::MetricsReporter;
pub use status::StatusReporter;

use crate::config::ScheduleConfig;
use crate::core::AgentSettings;
use crate::task_manager::TaskManager;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct MonitoringScheduler {
    metrics: Arc<MetricsReporter>,
    status: Arc<StatusReporter>,
    liveness: Arc<LivenessMonitor>,
    schedule: ScheduleConfig,
    settings: Arc<ArcSwap<AgentSettings>>,
}

impl MonitoringScheduler {
    pub fn new(
        metrics: MetricsReporter,
        status: StatusReporter,
        liveness: LivenessMonitor,
        schedule: ScheduleConfig,
        settings: Arc<ArcSwap<AgentSettings>>,
    ) -> Self {
        Self {
            metrics: Arc::new(metrics),
            status: Arc::new(status),
            liveness: Arc::new(liveness),
            schedule,
            settings,
        }
    }

    /// The liveness period taken from the settings in effect at start.
    pub fn liveness_period(&self) -> Duration {
        let seconds = self.settings.load().app_settings.monitoring_interval_seconds;
        Duration::from_secs(seconds.max(1))
    }

    /// Spawns the three timers on `task_manager`. They stop when its
    /// shutdown channel fires.
    pub fn start(self, task_manager: &TaskManager) {
        let soft_exit = self.settings.load().app_settings.soft_exit_enabled;
        let grace = soft_exit.then(|| Duration::from_secs(self.schedule.shutdown_grace_secs));
        let liveness_period = self.liveness_period();
        info!(
            metrics_secs = self.schedule.metrics_interval_secs,
            status_secs = self.schedule.status_interval_secs,
            liveness_secs = liveness_period.as_secs(),
            soft_exit,
            "Starting monitoring timers"
        );

        let metrics = self.metrics;
        task_manager.spawn(
            "MetricsTimer",
            ticker::run_periodic(
                "metrics",
                Duration::from_secs(self.schedule.metrics_interval_secs.max(1)),
                grace,
                task_manager.get_shutdown_rx(),
                move || {
                    let metrics = metrics.clone();
                    async move { metrics.tick().await }
                },
            ),
        );

        let status = self.status;
        task_manager.spawn(
            "StatusTimer",
            ticker::run_periodic(
                "status",
                Duration::from_secs(self.schedule.status_interval_secs.max(1)),
                grace,
                task_manager.get_shutdown_rx(),
                move || {
                    let status = status.clone();
                    async move { status.tick().await }
                },
            ),
        );

        let liveness = self.liveness;
        task_manager.spawn(
            "LivenessTimer",
            ticker::run_periodic(
                "liveness",
                liveness_period,
                grace,
                task_manager.get_shutdown_rx(),
                move || {
                    let liveness = liveness.clone();
                    async move { liveness.tick().await }
                },
            ),
        );
    }
}
