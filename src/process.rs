//! Process-table lookups and relaunching of dead applications.
//!
//! Matching is by exact process name. Several processes can share a name, and
//! the binary's process name may differ from the configured app name; both
//! cases are reported as-is.

use crate::core::{MonitoredApplication, ProcessInspector, ProcessLauncher, ProcessUsage};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::System;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("application has neither a binary path nor a name to launch")]
    NoTarget,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// Liveness
// =============================================================================

/// A [`ProcessInspector`] over a cached `sysinfo` process table.
pub struct ProcessTable {
    system: Mutex<System>,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();
        Self {
            system: Mutex::new(system),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        // The table is only ever replaced wholesale, so a poisoned lock still
        // holds a consistent snapshot.
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for ProcessTable {
    fn refresh(&self) {
        let mut system = self.system();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();
    }

    fn is_running(&self, name: &str) -> bool {
        self.system().processes_by_exact_name(name).next().is_some()
    }

    fn usage(&self, name: &str) -> Option<ProcessUsage> {
        let system = self.system();
        let cores = system.cpus().len().max(1) as f64;
        let total_memory = system.total_memory();

        let mut matched = false;
        let mut usage = ProcessUsage::default();
        for process in system.processes_by_exact_name(name) {
            matched = true;
            usage.cpu_percent += f64::from(process.cpu_usage()) / cores;
            if total_memory > 0 {
                usage.memory_percent += process.memory() as f64 / total_memory as f64 * 100.0;
            }
        }
        matched.then_some(usage)
    }
}

// =============================================================================
// Relaunch
// =============================================================================

/// Relaunches an application as a detached child process.
#[derive(Debug, Default, Clone)]
pub struct CommandLauncher;

impl CommandLauncher {
    pub fn new() -> Self {
        Self
    }
}

/// The program to run for `app`: its binary path, or its name when no path is set.
pub fn launch_target(app: &MonitoredApplication) -> Option<&str> {
    [app.path_to_binary.trim(), app.name.trim()]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn relaunch(&self, app: &MonitoredApplication) -> Result<u32, LaunchError> {
        let program = launch_target(app).ok_or(LaunchError::NoTarget)?.to_string();

        let delay = app.restart_delay_seconds();
        if delay > 0 {
            debug!(app = %app.name, delay, "Waiting before relaunch");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        let child = Command::new(&program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        info!(app = %app.name, %program, pid, "Relaunched application");
        Ok(pid)
    }
}
