//! # Internal Metrics
//!
//! The agent records counters through the `metrics` facade at the call
//! sites. Without an installed recorder every call is a no-op. With
//! `metrics.log_metrics` enabled a [`LoggingRecorder`] is installed and logs
//! all counters, with their descriptions, every
//! `metrics.log_aggregation_seconds`.
//!
//! Recorded counters:
//!
//! - `telemetry_requests_total{endpoint,outcome}`
//! - `device_registrations_total{outcome}`
//! - `liveness_checks_total{state}`
//! - `app_restarts_total{outcome}`
//! - `ticks_skipped_total{timer}`
//! - `resource_threshold_exceeded_total{resource}`

pub mod logging_recorder;

pub use logging_recorder::LoggingRecorder;

use crate::config::MetricsConfig;
use metrics::Unit;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Installs the logging recorder if enabled and returns its reporting task.
pub fn install(
    config: &MetricsConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !config.log_metrics {
        return None;
    }

    let interval = Duration::from_secs(config.log_aggregation_seconds.max(1));
    let (recorder, handle) = LoggingRecorder::new(interval, shutdown_rx);
    if let Err(e) = metrics::set_global_recorder(recorder) {
        warn!(error = %e, "Failed to install metrics recorder");
        handle.abort();
        return None;
    }
    describe();
    info!(interval_secs = interval.as_secs(), "Logging internal metrics");
    Some(handle)
}

fn describe() {
    metrics::describe_counter!(
        "telemetry_requests_total",
        Unit::Count,
        "Requests sent to the backend, labeled by endpoint and outcome."
    );
    metrics::describe_counter!(
        "device_registrations_total",
        Unit::Count,
        "Device registration attempts, labeled by outcome."
    );
    metrics::describe_counter!(
        "liveness_checks_total",
        Unit::Count,
        "Per-app liveness checks, labeled by the observed state."
    );
    metrics::describe_counter!(
        "app_restarts_total",
        Unit::Count,
        "Relaunch attempts of dead applications, labeled by outcome."
    );
    metrics::describe_counter!(
        "ticks_skipped_total",
        Unit::Count,
        "Timer ticks skipped because the previous tick was still running."
    );
    metrics::describe_counter!(
        "resource_threshold_exceeded_total",
        Unit::Count,
        "Samples above the configured usage threshold, labeled by resource."
    );
}
