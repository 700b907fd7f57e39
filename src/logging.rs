//! Tracing subscriber set-up.
//!
//! Logs go to stderr and to a daily rolling file in `paths.log_dir`. The
//! level filter sits behind a reload layer so it can be tightened once the
//! user settings are known.

use crate::config::Config;
use crate::core::AgentSettings;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Lets the filter be changed after start-up.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Keeps only errors, so fatal diagnostics still reach the log.
    pub fn restrict_to_errors(&self) -> Result<()> {
        self.filter
            .reload(EnvFilter::new("error"))
            .context("failed to reload log filter")
    }

    /// Applies `enableLogging` from the user settings.
    pub fn apply_settings(&self, settings: &AgentSettings) -> Result<()> {
        if !settings.app_settings.logging_enabled {
            tracing::info!("Logging disabled in settings, recording errors only");
            self.restrict_to_errors()?;
        }
        Ok(())
    }
}

/// Installs the global subscriber. The returned guard flushes the file
/// writer when dropped and must outlive all logging.
pub fn init(config: &Config) -> Result<(WorkerGuard, LogHandle)> {
    let log_dir = &config.paths.log_dir;
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level '{}'", config.log_level))?,
    };
    let (filter, handle) = reload::Layer::new(filter);

    let file_appender = tracing_appender::rolling::daily(log_dir, &config.paths.log_file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(file_writer),
        )
        .try_init()
        .context("failed to set tracing subscriber")?;

    tracing::info!(log_dir = %log_dir.display(), "Logging initialized");
    Ok((guard, LogHandle { filter: handle }))
}
