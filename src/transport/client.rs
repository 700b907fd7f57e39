//! The HTTP client that talks to the monitoring backend.

use crate::config::BackendConfig;
use crate::core::{AppStatusReport, MonitoredApplication, ResourceSnapshot, Telemetry};
use crate::transport::{
    AgentSession, AppDownNotification, AppStatusesRequest, MonitoringDataRequest,
    RegisterDeviceRequest, RegisterDeviceResponse, TransportError,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::COOKIE;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Sends telemetry to the backend on behalf of one [`AgentSession`].
///
/// A registration failure after start-up cannot be recovered from; it is
/// reported on the `fatal` channel so the application can shut down.
pub struct TelemetryClient {
    http: reqwest::Client,
    api_base: String,
    auth_cookie_name: String,
    metrics_attempts: u32,
    session: AgentSession,
    fatal_tx: watch::Sender<bool>,
}

impl TelemetryClient {
    pub fn new(
        backend: &BackendConfig,
        user_email: impl Into<String>,
        device_name: impl Into<String>,
        fatal_tx: watch::Sender<bool>,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(backend.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: format!("{}/api/m", backend.base_url.trim_end_matches('/')),
            auth_cookie_name: backend.auth_cookie_name.clone(),
            metrics_attempts: backend.metrics_attempts.max(1),
            session: AgentSession::new(user_email, device_name),
            fatal_tx,
        })
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_base, endpoint)
    }

    fn device_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.api_base,
            endpoint,
            self.session.device_path_segment()
        )
    }

    /// Performs the registration request and returns the issued token.
    async fn request_token(&self) -> Result<String, TransportError> {
        let body = RegisterDeviceRequest {
            user_email: self.session.user_email(),
            device_name: self.session.device_name(),
        };
        let result = async {
            let response = self.http.post(self.url("register")).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Status { status, body });
            }
            let parsed: RegisterDeviceResponse = response.json().await?;
            parsed
                .auth_token
                .filter(|token| !token.trim().is_empty())
                .ok_or(TransportError::MissingToken)
        }
        .await;

        match result {
            Ok(token) => {
                metrics::counter!("device_registrations_total", "outcome" => "success")
                    .increment(1);
                info!(device = %self.session.device_name(), "Device registered");
                Ok(token)
            }
            Err(e) => {
                metrics::counter!("device_registrations_total", "outcome" => "failure")
                    .increment(1);
                error!(error = %e, "Device registration failed");
                Err(TransportError::Registration(Box::new(e)))
            }
        }
    }

    async fn ensure_token(&self) -> Result<String, TransportError> {
        let result = self.session.ensure_token(|| self.request_token()).await;
        if result.is_err() {
            self.fatal_tx.send_replace(true);
        }
        result
    }

    async fn post_once<T>(&self, url: &str, body: &T, token: &str) -> Result<(), TransportError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(COOKIE, format!("{}={}", self.auth_cookie_name, token))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TransportError::Status { status, body })
        }
    }

    /// Posts `body` once with the cached credential. A 401 invalidates the
    /// credential, re-registers, and resends the same body once.
    async fn post_authenticated<T>(&self, url: &str, body: &T) -> Result<(), TransportError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let token = self.ensure_token().await?;
        match self.post_once(url, body, &token).await {
            Err(e) if e.is_unauthorized() => {
                warn!("Backend rejected the auth token, registering again");
                self.session.invalidate(&token).await;
                let token = self.ensure_token().await?;
                self.post_once(url, body, &token).await
            }
            other => other,
        }
    }
}

fn record_request(endpoint: &'static str, outcome: &'static str) {
    metrics::counter!("telemetry_requests_total", "endpoint" => endpoint, "outcome" => outcome)
        .increment(1);
}

#[async_trait]
impl Telemetry for TelemetryClient {
    async fn register_device(&self) -> Result<(), TransportError> {
        self.session
            .ensure_token(|| self.request_token())
            .await
            .map(|_| ())
    }

    #[instrument(skip_all)]
    async fn send_monitoring_data(&self, snapshot: &ResourceSnapshot) {
        let url = self.device_url("data");
        let body = MonitoringDataRequest {
            user_email: self.session.user_email(),
            snapshot,
        };

        // A rejected credential is renewed at most once per submission, and
        // the resend counts as one of the attempts.
        let mut renewed = false;
        for attempt in 1..=self.metrics_attempts {
            let token = match self.ensure_token().await {
                Ok(token) => token,
                Err(e) => {
                    record_request("data", "failure");
                    error!(error = %e, "Dropping monitoring data, device is not registered");
                    return;
                }
            };
            match self.post_once(&url, &body, &token).await {
                Ok(()) => {
                    record_request("data", "success");
                    debug!(attempt, "Sent monitoring data");
                    return;
                }
                Err(e) if e.is_unauthorized() && !renewed => {
                    record_request("data", "failure");
                    warn!(attempt, "Backend rejected the auth token, registering again");
                    self.session.invalidate(&token).await;
                    renewed = true;
                }
                Err(e) => {
                    record_request("data", "failure");
                    debug!(attempt, error = %e, "Monitoring data attempt failed");
                }
            }
        }
        warn!(
            attempts = self.metrics_attempts,
            "Failed to send monitoring data, dropping sample"
        );
    }

    #[instrument(skip_all, fields(count = reports.len()))]
    async fn send_app_statuses(&self, reports: &[AppStatusReport]) {
        if reports.is_empty() {
            debug!("No monitored apps, skipping status report");
            return;
        }
        let body = AppStatusesRequest {
            user_email: self.session.user_email(),
            device_name: self.session.device_name(),
            statuses: reports,
        };
        match self.post_authenticated(&self.device_url("statuses"), &body).await {
            Ok(()) => {
                record_request("statuses", "success");
                debug!("Sent app statuses");
            }
            Err(e) => {
                record_request("statuses", "failure");
                warn!(error = %e, "Failed to send app statuses");
            }
        }
    }

    #[instrument(skip_all, fields(app = %app.name))]
    async fn notify_app_down(&self, app: &MonitoredApplication) {
        let body = AppDownNotification {
            user_email: self.session.user_email(),
            device_name: self.session.device_name(),
            app_name: &app.name,
            message: format!("Application {} is not running", app.name),
            timestamp: Utc::now(),
        };
        match self.post_authenticated(&self.device_url("notify"), &body).await {
            Ok(()) => {
                record_request("notify", "success");
                info!("Reported dead application");
            }
            Err(e) => {
                record_request("notify", "failure");
                warn!(error = %e, "Failed to report dead application");
            }
        }
    }
}
