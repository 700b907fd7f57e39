//! # Telemetry Transport
//!
//! Outbound communication with the backend under `{base_url}/api/m/`.
//!
//! - `session`: the cached credential and registration state, shared by all
//!   three timers.
//! - `client`: the `reqwest`-based [`TelemetryClient`] implementing the
//!   [`Telemetry`](crate::core::Telemetry) trait.

pub mod client;
pub mod session;

pub use client::TelemetryClient;
pub use session::AgentSession;

use crate::core::{AppStatusReport, ResourceSnapshot};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("device registration failed: {0}")]
    Registration(#[source] Box<TransportError>),

    #[error("registration response carried no auth token")]
    MissingToken,
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest<'a> {
    pub user_email: &'a str,
    pub device_name: &'a str,
}

/// The backend has answered with both `authToken` and `token` over time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceResponse {
    #[serde(default, alias = "token")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringDataRequest<'a> {
    pub user_email: &'a str,
    #[serde(flatten)]
    pub snapshot: &'a ResourceSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusesRequest<'a> {
    pub user_email: &'a str,
    pub device_name: &'a str,
    pub statuses: &'a [AppStatusReport],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDownNotification<'a> {
    pub user_email: &'a str,
    pub device_name: &'a str,
    pub app_name: &'a str,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
