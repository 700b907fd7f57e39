//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::{AgentSettings, ProcessInspector, ProcessLauncher, ResourceSampler, Telemetry},
    logging::LogHandle,
    process::{CommandLauncher, ProcessTable},
    sampler::SysinfoSampler,
    scheduler::{LivenessMonitor, MetricsReporter, MonitoringScheduler, StatusReporter},
    store::ConfigStore,
    task_manager::TaskManager,
    transport::TelemetryClient,
};
use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// A running agent: the three timers plus the signals that stop them.
pub struct App {
    task_manager: TaskManager,
    shutdown_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
    fatal_rx: watch::Receiver<bool>,
    shutdown_deadline: Duration,
    settings: Arc<ArcSwap<AgentSettings>>,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The settings currently in effect.
    pub fn settings(&self) -> Arc<AgentSettings> {
        self.settings.load_full()
    }

    /// Names of the timers still running.
    pub fn active_tasks(&self) -> Vec<&'static str> {
        self.task_manager.active_tasks()
    }

    /// Runs until the shutdown signal fires or the device loses its
    /// registration. The latter is returned as an error.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut fatal_rx = self.fatal_rx.clone();

        let fatal = tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => false,
            Ok(_) = fatal_rx.wait_for(|fatal| *fatal) => true,
        };
        if fatal {
            warn!("Device registration lost, stopping timers");
        } else {
            info!("Shutdown signal received, stopping timers");
        }

        self.stop_tx.send_replace(true);
        self.task_manager.shutdown(self.shutdown_deadline).await;

        if fatal {
            bail!("device registration failed while running");
        }
        info!("Agent stopped");
        Ok(())
    }
}

/// Builder for the agent.
///
/// Every OS- or network-facing component can be overridden, which is how the
/// tests run the scheduler against fakes.
pub struct AppBuilder {
    config: Config,
    log_handle: Option<LogHandle>,
    sampler_override: Option<Arc<dyn ResourceSampler>>,
    inspector_override: Option<Arc<dyn ProcessInspector>>,
    launcher_override: Option<Arc<dyn ProcessLauncher>>,
    telemetry_override: Option<Arc<dyn Telemetry>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            log_handle: None,
            sampler_override: None,
            inspector_override: None,
            launcher_override: None,
            telemetry_override: None,
        }
    }

    /// Lets the build apply `enableLogging` from the settings.
    pub fn log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    pub fn sampler_override(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler_override = Some(sampler);
        self
    }

    pub fn inspector_override(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector_override = Some(inspector);
        self
    }

    pub fn launcher_override(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher_override = Some(launcher);
        self
    }

    pub fn telemetry_override(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry_override = Some(telemetry);
        self
    }

    /// Loads both documents, registers the device and starts the timers.
    ///
    /// Fails, before any timer starts, when either document is missing, the
    /// settings are invalid or registration is refused.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;

        // =========================================================================
        // 1. Load the user configuration
        // =========================================================================
        let store = ConfigStore::new(
            config.paths.settings.clone(),
            config.paths.monitored_apps.clone(),
        );
        let settings = store
            .load_settings()
            .context("cannot start without valid settings")?;
        if let Some(handle) = &self.log_handle {
            handle.apply_settings(&settings)?;
        }
        let apps = store
            .load_monitored_apps()
            .context("cannot start without the monitored apps file")?;
        info!(
            user = %settings.user.email,
            apps = apps.len(),
            "Loaded configuration"
        );

        // =========================================================================
        // 2. Register the device
        // =========================================================================
        let (fatal_tx, fatal_rx) = watch::channel(false);
        let telemetry: Arc<dyn Telemetry> = match self.telemetry_override {
            Some(telemetry) => telemetry,
            None => {
                let device_name = config.backend.resolve_device_name();
                info!(device = %device_name, backend = %config.backend.base_url, "Using backend");
                Arc::new(
                    TelemetryClient::new(
                        &config.backend,
                        settings.user.email.clone(),
                        device_name,
                        fatal_tx,
                    )
                    .context("failed to create HTTP client")?,
                )
            }
        };
        telemetry
            .register_device()
            .await
            .context("cannot start without a registered device")?;

        // =========================================================================
        // 3. Start the timers
        // =========================================================================
        let sampler = self
            .sampler_override
            .unwrap_or_else(|| Arc::new(SysinfoSampler::new()));
        let inspector = self
            .inspector_override
            .unwrap_or_else(|| Arc::new(ProcessTable::new()));
        let launcher = self
            .launcher_override
            .unwrap_or_else(|| Arc::new(CommandLauncher::new()));

        let settings = Arc::new(ArcSwap::from_pointee(settings));
        let scheduler = MonitoringScheduler::new(
            MetricsReporter::new(sampler, telemetry.clone(), settings.clone()),
            StatusReporter::new(store.clone(), inspector.clone(), telemetry.clone()),
            LivenessMonitor::new(store, settings.clone(), inspector, launcher, telemetry),
            config.schedule.clone(),
            settings.clone(),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let task_manager = TaskManager::new(stop_rx);
        scheduler.start(&task_manager);

        Ok(App {
            task_manager,
            shutdown_rx,
            stop_tx,
            fatal_rx,
            shutdown_deadline: Duration::from_secs(config.schedule.shutdown_grace_secs + 1),
            settings,
        })
    }
}
