//! QR-login credential capture.
//!
//! Each session runs a browser through the reader's login flow on its own task
//! and publishes its progress through a `watch` channel; pollers only ever see
//! snapshots. Terminal sessions stay queryable until `expires_at`.

#[cfg(feature = "browser")]
pub mod chrome;
pub mod driver;
pub mod types;
mod worker;


use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::store::TenantStore;
use driver::DriverFactory;
use types::{CaptureSnapshot, CaptureStatus, StartedCapture};
use worker::CaptureWorker;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("{0}")]
    Automation(String),
    #[error("login was not observed in time")]
    Timeout,
    #[error("session cancelled")]
    Cancelled,
    #[error("QR code unavailable: {0}")]
    QrUnavailable(String),
    #[error("capture session {0} not found")]
    NotFound(String),
}

/// Timing and page parameters for the login flow.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub reader_url: String,
    pub trigger_url: String,
    /// Path of the read request to intercept; sibling endpoints are ignored.
    pub intercept_fragment: String,
    pub qr_wait: Duration,
    pub login_poll_attempts: u32,
    pub login_poll_interval: Duration,
    pub intercept_wait: Duration,
    pub retention: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            reader_url: config.target.reader_url.clone(),
            trigger_url: config.target.trigger_url.clone(),
            intercept_fragment: "/web/book/read".to_string(),
            qr_wait: config.capture.qr_wait(),
            login_poll_attempts: config.capture.login_poll_attempts,
            login_poll_interval: config.capture.login_poll_interval(),
            intercept_wait: config.capture.intercept_wait(),
            retention: config.capture.retention(),
        }
    }

    /// Longest a session can run before reaching a terminal state.
    fn session_budget(&self) -> Duration {
        self.qr_wait * 2
            + self.login_poll_interval * self.login_poll_attempts
            + self.intercept_wait
    }

    pub(crate) fn retention_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero())
    }
}

struct SessionHandle {
    updates: watch::Receiver<CaptureSnapshot>,
    cancel: CancellationToken,
}

pub struct CaptureManager {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    factory: Arc<dyn DriverFactory>,
    store: Arc<dyn TenantStore>,
    settings: CaptureSettings,
}

impl CaptureManager {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        store: Arc<dyn TenantStore>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            store,
            settings,
        }
    }

    /// Spawn a capture session and wait until its QR code is available.
    pub async fn start(&self) -> Result<StartedCapture, CaptureError> {
        self.prune_expired().await;

        let session_id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let budget = chrono::Duration::from_std(self.settings.session_budget())
            .unwrap_or(chrono::Duration::zero());
        let snapshot = CaptureSnapshot::new(
            session_id.clone(),
            created_at,
            created_at + budget + self.settings.retention_delta(),
        );

        let (tx, mut rx) = watch::channel(snapshot.clone());
        let cancel = CancellationToken::new();
        self.sessions.write().await.insert(
            session_id.clone(),
            SessionHandle {
                updates: rx.clone(),
                cancel: cancel.clone(),
            },
        );

        let worker = CaptureWorker::new(
            snapshot,
            tx,
            cancel.clone(),
            self.store.clone(),
            self.settings.clone(),
        );
        tokio::spawn(worker.run(self.factory.clone()));
        info!(session = %session_id, "Capture session started");

        let ready = tokio::time::timeout(self.settings.qr_wait, async {
            rx.wait_for(|s| s.qr_image.is_some() || s.status.is_terminal())
                .await
                .map(|s| s.clone())
        })
        .await;

        match ready {
            Ok(Ok(snapshot)) => match snapshot.qr_image {
                Some(qr_image) if !snapshot.status.is_terminal() => Ok(StartedCapture {
                    session_id,
                    qr_image,
                    expires_at: snapshot.expires_at,
                }),
                _ => Err(CaptureError::QrUnavailable(
                    snapshot
                        .error
                        .unwrap_or_else(|| snapshot.status.message().to_string()),
                )),
            },
            Ok(Err(_)) => Err(CaptureError::QrUnavailable(
                "capture worker stopped".to_string(),
            )),
            Err(_) => {
                cancel.cancel();
                Err(CaptureError::QrUnavailable(
                    "timed out waiting for the QR code".to_string(),
                ))
            }
        }
    }

    pub async fn status(&self, session_id: &str) -> Option<CaptureSnapshot> {
        self.prune_expired().await;
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|handle| handle.updates.borrow().clone())
    }

    /// Request cancellation. Has no effect once the user has logged in.
    pub async fn cancel(&self, session_id: &str) -> Result<CaptureSnapshot, CaptureError> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| CaptureError::NotFound(session_id.to_string()))?;
        let snapshot = handle.updates.borrow().clone();
        if matches!(
            snapshot.status,
            CaptureStatus::Initializing | CaptureStatus::WaitingForScan
        ) {
            info!(session = %session_id, "Cancellation requested");
            handle.cancel.cancel();
        }
        Ok(snapshot)
    }

    /// Drop terminal sessions whose retention has lapsed, from memory and from
    /// the store. Returns how many live handles went.
    pub async fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let pruned = {
            let mut sessions = self.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|_, handle| {
                let snapshot = handle.updates.borrow();
                !(snapshot.status.is_terminal() && snapshot.has_lapsed(now))
            });
            before - sessions.len()
        };
        match self.store.delete_expired_captures(now).await {
            Ok(0) => {}
            Ok(purged) => debug!("Purged {} expired capture sessions from the store", purged),
            Err(e) => warn!("Failed to purge expired capture sessions: {:#}", e),
        }
        pruned
    }
}
