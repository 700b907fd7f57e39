//! Core domain types and service traits for the spyserv agent
//!
//! This module defines the data carried between components and the trait
//! contracts that govern how the scheduler talks to the operating system and
//! to the backend.

use crate::process::LaunchError;
use crate::sampler::SamplingError;
use crate::transport::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use thiserror::Error;

// =============================================================================
// Validation
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} should be between 0 and 100, instead of {value}")]
    ThresholdOutOfRange { field: &'static str, value: i64 },
}

/// A resource usage threshold expressed as a percentage in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Threshold(u8);

impl Threshold {
    pub fn new(field: &'static str, value: i64) -> Result<Self, ValidationError> {
        if (0..=100).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::ThresholdOutOfRange { field, value })
        }
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Returns `true` when `usage_percent` lies strictly above the threshold.
    pub fn is_exceeded_by(self, usage_percent: f64) -> bool {
        usage_percent > f64::from(self.0)
    }
}

impl TryFrom<i64> for Threshold {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new("threshold", value)
    }
}

impl From<Threshold> for i64 {
    fn from(threshold: Threshold) -> Self {
        i64::from(threshold.0)
    }
}

// =============================================================================
// Agent settings (appsettings.json)
// =============================================================================

/// Process-wide settings read from the settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default)]
    pub app_settings: ServiceSettings,
    #[serde(default)]
    pub res_mon_settings: ResourceThresholds,
    /// The owner of this device. Required: the agent reports under this identity.
    pub user: UserIdentity,
}

/// Feature toggles and the liveness-cycle period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    #[serde(rename = "checkApplicationsStatus")]
    pub check_applications_enabled: bool,
    #[serde(rename = "sendMonitoringData")]
    pub send_metrics_enabled: bool,
    #[serde(rename = "sendNotifications")]
    pub send_notifications_enabled: bool,
    #[serde(rename = "softExiting")]
    pub soft_exit_enabled: bool,
    #[serde(rename = "enableLogging")]
    pub logging_enabled: bool,
    /// Liveness-cycle period in seconds.
    #[serde(rename = "monitoringInterval")]
    pub monitoring_interval_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            check_applications_enabled: true,
            send_metrics_enabled: true,
            send_notifications_enabled: true,
            soft_exit_enabled: true,
            logging_enabled: true,
            monitoring_interval_seconds: 60,
        }
    }
}

/// Per-resource monitoring flags and alert thresholds.
///
/// Thresholds can only be changed through the validating setters, so an
/// out-of-range value is rejected instead of being clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    #[serde(rename = "monitorCpuUsage")]
    pub monitor_cpu: bool,
    #[serde(rename = "monitorMemoryUsage")]
    pub monitor_memory: bool,
    #[serde(rename = "monitorDiskUsage")]
    pub monitor_disk: bool,
    #[serde(rename = "cpuUsageThreshold")]
    cpu_threshold: Threshold,
    #[serde(rename = "memoryUsageThreshold")]
    memory_threshold: Threshold,
    #[serde(rename = "diskUsageThreshold")]
    disk_threshold: Threshold,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            monitor_cpu: true,
            monitor_memory: true,
            monitor_disk: true,
            cpu_threshold: Threshold(80),
            memory_threshold: Threshold(90),
            disk_threshold: Threshold(90),
        }
    }
}

impl ResourceThresholds {
    pub fn cpu_threshold(&self) -> Threshold {
        self.cpu_threshold
    }

    pub fn memory_threshold(&self) -> Threshold {
        self.memory_threshold
    }

    pub fn disk_threshold(&self) -> Threshold {
        self.disk_threshold
    }

    pub fn set_cpu_threshold(&mut self, value: i64) -> Result<(), ValidationError> {
        self.cpu_threshold = Threshold::new("cpuUsageThreshold", value)?;
        Ok(())
    }

    pub fn set_memory_threshold(&mut self, value: i64) -> Result<(), ValidationError> {
        self.memory_threshold = Threshold::new("memoryUsageThreshold", value)?;
        Ok(())
    }

    pub fn set_disk_threshold(&mut self, value: i64) -> Result<(), ValidationError> {
        self.disk_threshold = Threshold::new("diskUsageThreshold", value)?;
        Ok(())
    }

    /// Returns `true` if the given resource should be sampled.
    pub fn is_enabled(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Cpu => self.monitor_cpu,
            ResourceKind::Memory => self.monitor_memory,
            ResourceKind::Disk => self.monitor_disk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

// =============================================================================
// Monitored applications (monitored-apps.json)
// =============================================================================

/// One external process under watch.
///
/// Identity and equality are defined by `name` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "MonitoredAppRecord", into = "MonitoredAppRecord")]
pub struct MonitoredApplication {
    pub name: String,
    pub path_to_binary: String,
    pub path_to_logs: String,
    pub description: String,
    pub is_running: bool,
    pub auto_restart: bool,
    pub checking_interval_seconds: u64,
    pub suppress_notifications: bool,
    restart_delay_seconds: u64,
}

impl MonitoredApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_to_binary: String::new(),
            path_to_logs: String::new(),
            description: String::new(),
            is_running: true,
            auto_restart: false,
            checking_interval_seconds: 60,
            suppress_notifications: false,
            restart_delay_seconds: 0,
        }
    }

    pub fn with_checking_interval(mut self, seconds: u64) -> Self {
        self.checking_interval_seconds = seconds;
        self
    }

    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    pub fn with_restart_delay(mut self, seconds: i64) -> Self {
        self.set_restart_delay(seconds);
        self
    }

    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.path_to_binary = path.into();
        self
    }

    pub fn set_restart_delay(&mut self, seconds: i64) {
        self.restart_delay_seconds = seconds.max(0) as u64;
    }

    /// The effective restart delay: always 0 unless `auto_restart` is set.
    pub fn restart_delay_seconds(&self) -> u64 {
        if self.auto_restart {
            self.restart_delay_seconds
        } else {
            0
        }
    }
}

impl PartialEq for MonitoredApplication {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MonitoredApplication {}

impl Hash for MonitoredApplication {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// The on-disk shape of a monitored application, as written by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MonitoredAppRecord {
    name: String,
    path_to_bin: String,
    path_to_logs: String,
    description: String,
    is_running: bool,
    auto_restart: bool,
    checking_interval_in_sec: u64,
    restart_delay: i64,
    no_notify: bool,
}

impl Default for MonitoredAppRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            path_to_bin: String::new(),
            path_to_logs: String::new(),
            description: String::new(),
            is_running: true,
            auto_restart: false,
            checking_interval_in_sec: 60,
            restart_delay: 0,
            no_notify: false,
        }
    }
}

impl From<MonitoredAppRecord> for MonitoredApplication {
    fn from(record: MonitoredAppRecord) -> Self {
        let mut app = MonitoredApplication {
            name: record.name,
            path_to_binary: record.path_to_bin,
            path_to_logs: record.path_to_logs,
            description: record.description,
            is_running: record.is_running,
            auto_restart: record.auto_restart,
            checking_interval_seconds: record.checking_interval_in_sec,
            suppress_notifications: record.no_notify,
            restart_delay_seconds: 0,
        };
        app.set_restart_delay(record.restart_delay);
        app
    }
}

impl From<MonitoredApplication> for MonitoredAppRecord {
    fn from(app: MonitoredApplication) -> Self {
        Self {
            restart_delay: app.restart_delay_seconds() as i64,
            name: app.name,
            path_to_bin: app.path_to_binary,
            path_to_logs: app.path_to_logs,
            description: app.description,
            is_running: app.is_running,
            auto_restart: app.auto_restart,
            checking_interval_in_sec: app.checking_interval_seconds,
            no_notify: app.suppress_notifications,
        }
    }
}

// =============================================================================
// Telemetry payloads
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] =
        [ResourceKind::Cpu, ResourceKind::Memory, ResourceKind::Disk];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuResult {
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryResult {
    pub used_percent: f64,
    pub total_memory_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskResult {
    pub read_mbps: f64,
    pub write_mbps: f64,
    pub device: String,
}

/// One metrics-tick sample. Disabled or failed resources are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub cpu_result: Option<CpuResult>,
    pub memory_result: Option<MemoryResult>,
    pub disk_result: Option<DiskResult>,
}

/// Liveness and usage of one monitored app at one status tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusReport {
    pub app_name: String,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub is_running: bool,
    pub last_checked: DateTime<Utc>,
}

/// Summed usage of every OS process that matches an app name.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Reads system-wide resource usage.
///
/// Implementations are synchronous; callers run them on the blocking pool.
pub trait ResourceSampler: Send + Sync {
    fn sample_cpu(&self) -> Result<CpuResult, SamplingError>;
    fn sample_memory(&self) -> Result<MemoryResult, SamplingError>;
    fn sample_disk(&self) -> Result<DiskResult, SamplingError>;
}

/// Looks processes up by name in the OS process table.
pub trait ProcessInspector: Send + Sync {
    /// Re-reads the process table. Queries between two refreshes see the same table.
    fn refresh(&self);
    fn is_running(&self, name: &str) -> bool;
    fn usage(&self, name: &str) -> Option<ProcessUsage>;
}

/// Starts a monitored application again after it was found dead.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Relaunches the app and returns the PID of the new process.
    async fn relaunch(&self, app: &MonitoredApplication) -> Result<u32, LaunchError>;
}

/// Outbound communication with the backend.
///
/// Only `register_device` reports failure; the send operations log and
/// swallow every error.
#[async_trait]
pub trait Telemetry: Send + Sync {
    async fn register_device(&self) -> Result<(), TransportError>;
    async fn send_monitoring_data(&self, snapshot: &ResourceSnapshot);
    async fn send_app_statuses(&self, reports: &[AppStatusReport]);
    async fn notify_app_down(&self, app: &MonitoredApplication);
}
