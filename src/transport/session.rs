use crate::transport::TransportError;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

/// Identity and credential state of one agent run.
///
/// The token lives behind an async mutex that is held across the whole
/// registration request, so concurrent callers that find no token wait for
/// the one registration in flight instead of starting their own.
#[derive(Debug)]
pub struct AgentSession {
    user_email: String,
    device_name: String,
    token: Mutex<Option<String>>,
}

impl AgentSession {
    pub fn new(user_email: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            user_email: user_email.into(),
            device_name: device_name.into(),
            token: Mutex::new(None),
        }
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// The device name as it appears in request paths.
    pub fn device_path_segment(&self) -> String {
        self.device_name.to_lowercase()
    }

    pub async fn is_registered(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Returns the cached token, running `register` first if there is none.
    pub async fn ensure_token<F, Fut>(&self, register: F) -> Result<String, TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, TransportError>>,
    {
        let mut token = self.token.lock().await;
        if let Some(token) = token.as_ref() {
            return Ok(token.clone());
        }
        let fresh = register().await?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops `stale` from the cache. A token that was already replaced by a
    /// concurrent re-registration is left alone.
    pub async fn invalidate(&self, stale: &str) {
        let mut token = self.token.lock().await;
        if token.as_deref() == Some(stale) {
            debug!("Invalidating cached auth token");
            *token = None;
        }
    }
}
