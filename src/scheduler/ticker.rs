//! Periodic scheduling with skip-if-busy ticks and bounded shutdown.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Runs `work` every `period` until `shutdown_rx` fires.
///
/// Each tick runs in its own task. A tick that comes due while the previous
/// one is still running is skipped, never queued. On shutdown an in-flight
/// tick is given `grace` to finish and is aborted afterwards; with no grace it
/// is aborted at once.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    grace: Option<Duration>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut work: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    info!(timer = name, period_secs = period.as_secs_f64(), "Timer started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!(timer = name, "Timer received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if let Some(handle) = in_flight.take() {
                    if !handle.is_finished() {
                        warn!(timer = name, "Previous tick still running, skipping");
                        metrics::counter!("ticks_skipped_total", "timer" => name).increment(1);
                        in_flight = Some(handle);
                        continue;
                    }
                    report_tick_result(name, handle.await);
                }
                in_flight = Some(tokio::spawn(work()));
            }
        }
    }

    if let Some(mut handle) = in_flight {
        if handle.is_finished() {
            report_tick_result(name, handle.await);
        } else if let Some(grace) = grace {
            info!(timer = name, grace_secs = grace.as_secs(), "Waiting for in-flight tick");
            match timeout(grace, &mut handle).await {
                Ok(result) => report_tick_result(name, result),
                Err(_) => {
                    warn!(timer = name, "In-flight tick outlived the grace period, aborting");
                    handle.abort();
                }
            }
        } else {
            debug!(timer = name, "Aborting in-flight tick");
            handle.abort();
        }
    }
    info!(timer = name, "Timer stopped");
}

fn report_tick_result(name: &'static str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(timer = name, "Tick panicked");
        }
    }
}
