//! # Resource Sampler
//!
//! Reads system-wide CPU, memory and disk usage through the `sysinfo` crate.
//! The `sysinfo` handles are kept between samples: CPU usage and per-process
//! disk I/O are both computed as deltas against the previous refresh.

use crate::core::{CpuResult, DiskResult, MemoryResult, ResourceSampler};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use sysinfo::{Disks, System};
use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplingError {
    /// The platform offers no way to read this resource. Retrying is pointless.
    #[error("{0} sampling is not supported on this platform")]
    Unsupported(&'static str),

    /// The query failed this time but may succeed on a later tick.
    #[error("{0} sampling failed: {1}")]
    Unavailable(&'static str, String),
}

struct SamplerState {
    system: System,
    disks: Disks,
    last_disk_sample: Instant,
}

/// A [`ResourceSampler`] backed by `sysinfo`.
pub struct SysinfoSampler {
    state: Mutex<SamplerState>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // Establish baselines so the first real sample yields a delta.
        system.refresh_cpu();
        system.refresh_processes();
        Self {
            state: Mutex::new(SamplerState {
                system,
                disks: Disks::new_with_refreshed_list(),
                last_disk_sample: Instant::now(),
            }),
        }
    }

    fn lock(&self, resource: &'static str) -> Result<MutexGuard<'_, SamplerState>, SamplingError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(SamplingError::Unsupported(resource));
        }
        self.state
            .lock()
            .map_err(|_| SamplingError::Unavailable(resource, "sampler state poisoned".into()))
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample_cpu(&self) -> Result<CpuResult, SamplingError> {
        let mut state = self.lock("cpu")?;
        state.system.refresh_cpu();
        if state.system.cpus().is_empty() {
            return Err(SamplingError::Unavailable("cpu", "no CPUs reported".into()));
        }
        let usage = state.system.global_cpu_info().cpu_usage();
        Ok(CpuResult {
            usage_percent: f64::from(usage).clamp(0.0, 100.0),
        })
    }

    fn sample_memory(&self) -> Result<MemoryResult, SamplingError> {
        let mut state = self.lock("memory")?;
        state.system.refresh_memory();
        let total = state.system.total_memory();
        if total == 0 {
            return Err(SamplingError::Unavailable("memory", "total memory is zero".into()));
        }
        let used = state.system.used_memory();
        Ok(MemoryResult {
            used_percent: used as f64 / total as f64 * 100.0,
            total_memory_mb: total / (1024 * 1024),
        })
    }

    fn sample_disk(&self) -> Result<DiskResult, SamplingError> {
        let mut state = self.lock("disk")?;
        state.disks.refresh_list();
        let device = main_disk_name(&state.disks)
            .ok_or_else(|| SamplingError::Unavailable("disk", "cannot locate disk".into()))?;

        state.system.refresh_processes();
        let (read_bytes, written_bytes) = state
            .system
            .processes()
            .values()
            .map(|p| p.disk_usage())
            .fold((0u64, 0u64), |(r, w), usage| {
                (
                    r.saturating_add(usage.read_bytes),
                    w.saturating_add(usage.written_bytes),
                )
            });

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_disk_sample).as_secs_f64();
        state.last_disk_sample = now;

        let (read_mbps, write_mbps) = if elapsed > 0.0 {
            (
                read_bytes as f64 / BYTES_PER_MB / elapsed,
                written_bytes as f64 / BYTES_PER_MB / elapsed,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(DiskResult {
            read_mbps,
            write_mbps,
            device,
        })
    }
}

/// Name of the disk mounted at `/`, or the first disk when there is no root mount.
fn main_disk_name(disks: &Disks) -> Option<String> {
    let list = disks.list();
    let disk = list
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| list.first())?;
    Some(strip_dev_prefix(&disk.name().to_string_lossy()))
}

fn strip_dev_prefix(name: &str) -> String {
    name.strip_prefix("/dev/").unwrap_or(name).to_string()
}
