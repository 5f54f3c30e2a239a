use crate::config::StatusProviderConfig;
use crate::state::ApplicationStatus;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("application status unavailable: {reason}")]
pub struct ProviderUnavailable {
    pub reason: String,
}

impl ProviderUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The narrow view the collector has of the host application.
#[async_trait]
pub trait ApplicationStatusProvider: Send + Sync {
    async fn status(&self) -> Result<ApplicationStatus, ProviderUnavailable>;
}

/// Used when no application is attached; every tick publishes a disconnected snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedProvider;

#[async_trait]
impl ApplicationStatusProvider for DetachedProvider {
    async fn status(&self) -> Result<ApplicationStatus, ProviderUnavailable> {
        Err(ProviderUnavailable::new("no application attached"))
    }
}

/// In-process status handle. The host keeps an `Arc` and writes to it as its state changes.
#[derive(Debug, Default)]
pub struct StatusBoard {
    current: RwLock<Option<ApplicationStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, status: ApplicationStatus) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    pub fn update(&self, f: impl FnOnce(&mut ApplicationStatus)) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        f(guard.get_or_insert_with(ApplicationStatus::default));
    }

    pub fn mark_unavailable(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl ApplicationStatusProvider for StatusBoard {
    async fn status(&self) -> Result<ApplicationStatus, ProviderUnavailable> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ProviderUnavailable::new("application not ready"))
    }
}

/// Polls a JSON status endpoint exposed by an application in another process.
pub struct HttpStatusProvider {
    client: Client,
    url: String,
    timeout: Duration,
}

pub const USER_AGENT: &str = concat!("statusd/", env!("CARGO_PKG_VERSION"));

impl HttpStatusProvider {
    /// Builds its own client identified by [`USER_AGENT`].
    pub fn from_config(cfg: &StatusProviderConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::new(client, cfg))
    }

    pub fn new(client: Client, cfg: &StatusProviderConfig) -> Self {
        Self {
            client,
            url: cfg.url.clone(),
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }
}

#[async_trait]
impl ApplicationStatusProvider for HttpStatusProvider {
    async fn status(&self) -> Result<ApplicationStatus, ProviderUnavailable> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| ProviderUnavailable::new(format!("GET {}: {err}", self.url)))?;

        let code = resp.status();
        if !code.is_success() {
            return Err(ProviderUnavailable::new(format!(
                "GET {} returned {}",
                self.url,
                code.as_u16()
            )));
        }

        resp.json::<ApplicationStatus>()
            .await
            .map_err(|err| ProviderUnavailable::new(format!("bad status body: {err}")))
    }
}
