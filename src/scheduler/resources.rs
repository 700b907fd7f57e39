//! The metrics timer: samples host resources and sends them when enabled.

use crate::core::{
    AgentSettings, ResourceKind, ResourceSampler, ResourceSnapshot, ResourceThresholds, Telemetry,
};
use crate::sampler::SamplingError;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Samples system resources and pushes one snapshot per metrics tick.
pub struct MetricsReporter {
    sampler: Arc<dyn ResourceSampler>,
    telemetry: Arc<dyn Telemetry>,
    settings: Arc<ArcSwap<AgentSettings>>,
    /// Resources the platform cannot sample. Never retried during this run.
    unsupported: Mutex<HashSet<ResourceKind>>,
}

impl MetricsReporter {
    pub fn new(
        sampler: Arc<dyn ResourceSampler>,
        telemetry: Arc<dyn Telemetry>,
        settings: Arc<ArcSwap<AgentSettings>>,
    ) -> Self {
        Self {
            sampler,
            telemetry,
            settings,
            unsupported: Mutex::new(HashSet::new()),
        }
    }

    pub async fn tick(&self) {
        let settings = self.settings.load_full();
        if !settings.app_settings.send_metrics_enabled {
            debug!("Sending monitoring data is disabled");
            return;
        }
        let snapshot = self.collect(&settings.res_mon_settings).await;
        self.telemetry.send_monitoring_data(&snapshot).await;
    }

    /// Samples every enabled resource. Disabled and failed resources stay `None`.
    pub async fn collect(&self, thresholds: &ResourceThresholds) -> ResourceSnapshot {
        let kinds: Vec<ResourceKind> = {
            let unsupported = self.unsupported.lock().unwrap_or_else(|e| e.into_inner());
            ResourceKind::ALL
                .into_iter()
                .filter(|kind| thresholds.is_enabled(*kind) && !unsupported.contains(kind))
                .collect()
        };
        if kinds.is_empty() {
            return ResourceSnapshot::default();
        }

        let sampler = self.sampler.clone();
        let sampled = tokio::task::spawn_blocking(move || {
            let mut snapshot = ResourceSnapshot::default();
            let mut failures = Vec::new();
            for kind in kinds {
                let outcome = match kind {
                    ResourceKind::Cpu => {
                        sampler.sample_cpu().map(|r| snapshot.cpu_result = Some(r))
                    }
                    ResourceKind::Memory => {
                        sampler.sample_memory().map(|r| snapshot.memory_result = Some(r))
                    }
                    ResourceKind::Disk => {
                        sampler.sample_disk().map(|r| snapshot.disk_result = Some(r))
                    }
                };
                if let Err(e) = outcome {
                    failures.push((kind, e));
                }
            }
            (snapshot, failures)
        })
        .await;

        let (snapshot, failures) = match sampled {
            Ok(sampled) => sampled,
            Err(e) => {
                warn!(error = %e, "Resource sampling task failed");
                return ResourceSnapshot::default();
            }
        };

        for (kind, error) in failures {
            match error {
                SamplingError::Unsupported(_) => {
                    warn!(
                        resource = %kind,
                        error = %error,
                        "Disabling resource for the rest of the run"
                    );
                    self.unsupported
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(kind);
                }
                SamplingError::Unavailable(..) => {
                    warn!(resource = %kind, error = %error, "Resource omitted from this sample");
                }
            }
        }

        check_thresholds(&snapshot, thresholds);
        snapshot
    }

    pub fn is_unsupported(&self, kind: ResourceKind) -> bool {
        self.unsupported
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&kind)
    }
}

fn check_thresholds(snapshot: &ResourceSnapshot, thresholds: &ResourceThresholds) {
    if let Some(cpu) = &snapshot.cpu_result {
        if thresholds.cpu_threshold().is_exceeded_by(cpu.usage_percent) {
            warn!(
                usage = cpu.usage_percent,
                threshold = thresholds.cpu_threshold().percent(),
                "CPU usage above threshold"
            );
            metrics::counter!("resource_threshold_exceeded_total", "resource" => "cpu")
                .increment(1);
        }
    }
    if let Some(memory) = &snapshot.memory_result {
        if thresholds.memory_threshold().is_exceeded_by(memory.used_percent) {
            warn!(
                usage = memory.used_percent,
                threshold = thresholds.memory_threshold().percent(),
                "Memory usage above threshold"
            );
            metrics::counter!("resource_threshold_exceeded_total", "resource" => "memory")
                .increment(1);
        }
    }
}
