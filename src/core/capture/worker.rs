use base64::Engine;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::driver::{BrowserDriver, DriverFactory};
use super::types::{CaptureSnapshot, CaptureStatus, can_transition};
use super::{CaptureError, CaptureSettings};
use crate::core::credentials::Credentials;
use crate::core::store::TenantStore;

/// Third match is the "log in" link in the reader's top bar.
const LOGIN_LINK: &str = ".readerTopBar_link";
const LOGIN_LINK_INDEX: usize = 2;
const QR_IMAGE: &str = r#"img[alt="扫码登录"]"#;
const AVATAR: &str = ".readerTopBar_avatar";

/// Drives one capture session. Sole writer of its snapshot.
pub(crate) struct CaptureWorker {
    snapshot: CaptureSnapshot,
    updates: watch::Sender<CaptureSnapshot>,
    cancel: CancellationToken,
    store: Arc<dyn TenantStore>,
    settings: CaptureSettings,
}

impl CaptureWorker {
    pub(crate) fn new(
        snapshot: CaptureSnapshot,
        updates: watch::Sender<CaptureSnapshot>,
        cancel: CancellationToken,
        store: Arc<dyn TenantStore>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            snapshot,
            updates,
            cancel,
            store,
            settings,
        }
    }

    pub(crate) async fn run(mut self, factory: Arc<dyn DriverFactory>) {
        self.persist().await;

        let result = match factory.launch().await {
            Ok(mut driver) => {
                let result = self.drive(driver.as_mut()).await;
                if let Err(e) = driver.close().await {
                    warn!(session = %self.snapshot.session_id, "Failed to close browser: {:#}", e);
                }
                result
            }
            Err(e) => Err(CaptureError::Automation(format!(
                "failed to launch browser: {:#}",
                e
            ))),
        };

        self.finish(result).await;
    }

    async fn drive(&mut self, driver: &mut dyn BrowserDriver) -> Result<Credentials, CaptureError> {
        self.checkpoint()?;

        let mut intercepted = self
            .guarded(driver.intercept(&self.settings.intercept_fragment), "register interception")
            .await?;
        let reader_url = self.settings.reader_url.clone();
        self.guarded(driver.open(&reader_url), "open reader page")
            .await?;
        self.guarded(
            driver.wait_for(LOGIN_LINK, self.settings.qr_wait),
            "find login link",
        )
        .await?;
        self.guarded(driver.click(LOGIN_LINK, LOGIN_LINK_INDEX), "click login link")
            .await?;

        self.guarded(driver.wait_for(QR_IMAGE, self.settings.qr_wait), "show QR code")
            .await?;
        let qr_image = self
            .guarded(driver.attribute(QR_IMAGE, "src"), "read QR code")
            .await?
            .filter(|src| !src.is_empty())
            .ok_or_else(|| CaptureError::Automation("QR code image has no source".to_string()))
            .and_then(check_qr_source)?;

        self.checkpoint()?;
        self.transition(CaptureStatus::WaitingForScan, |s| s.qr_image = Some(qr_image))
            .await;
        info!(session = %self.snapshot.session_id, "QR code ready, waiting for scan");

        self.wait_for_login(driver).await?;
        // A cancel accepted while the last login check was in flight still wins.
        self.checkpoint()?;

        // Anything intercepted so far predates the login.
        while intercepted.try_recv().is_ok() {}

        let trigger_url = self.settings.trigger_url.clone();
        self.guarded(driver.open(&trigger_url), "open chapter")
            .await?;
        self.checkpoint()?;
        self.transition(CaptureStatus::LoggedIn, |_| {}).await;
        info!(session = %self.snapshot.session_id, "Login detected, waiting for read request");

        let deadline = tokio::time::Instant::now() + self.settings.intercept_wait;
        let mut request = None;
        while let Ok(Some(req)) = tokio::time::timeout_at(deadline, intercepted.recv()).await {
            if is_read_request(&req.url, &self.settings.intercept_fragment) {
                request = Some(req);
                break;
            }
            debug!(session = %self.snapshot.session_id, url = %req.url, "Skipping unrelated request");
        }
        match request {
            Some(req) if !req.headers.is_empty() && !req.cookies.is_empty() => {
                Ok(Credentials::from_interception(req.headers, &req.cookies))
            }
            _ => Err(CaptureError::Automation(
                "credential capture incomplete".to_string(),
            )),
        }
    }

    async fn wait_for_login(&mut self, driver: &mut dyn BrowserDriver) -> Result<(), CaptureError> {
        for attempt in 1..=self.settings.login_poll_attempts {
            self.checkpoint()?;
            match driver.is_present(AVATAR).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => debug!("Login probe {} failed: {:#}", attempt, e),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(CaptureError::Cancelled),
                _ = tokio::time::sleep(self.settings.login_poll_interval) => {}
            }
        }
        Err(CaptureError::Timeout)
    }

    fn checkpoint(&self) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        Ok(())
    }

    /// Run a browser step, abandoning it as soon as the session is cancelled.
    async fn guarded<T>(
        &self,
        step: impl Future<Output = anyhow::Result<T>>,
        what: &str,
    ) -> Result<T, CaptureError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CaptureError::Cancelled),
            result = step => result.map_err(|e| CaptureError::Automation(format!("failed to {}: {:#}", what, e))),
        }
    }

    async fn finish(&mut self, result: Result<Credentials, CaptureError>) {
        let retention_end = Utc::now() + self.settings.retention_delta();
        let session = self.snapshot.session_id.clone();
        match result {
            Ok(credentials) => {
                info!(session = %session, "Credentials captured");
                self.transition(CaptureStatus::Completed, |s| {
                    s.credentials = Some(credentials);
                    s.expires_at = retention_end;
                })
                .await;
            }
            Err(CaptureError::Cancelled) => {
                info!(session = %session, "Capture cancelled");
                self.transition(CaptureStatus::Cancelled, |s| s.expires_at = retention_end)
                    .await;
            }
            Err(CaptureError::Timeout) => {
                warn!(session = %session, "Login not observed before poll limit");
                self.transition(CaptureStatus::Timeout, |s| s.expires_at = retention_end)
                    .await;
            }
            Err(e) => {
                warn!(session = %session, "Capture failed: {}", e);
                let message = e.to_string();
                self.transition(CaptureStatus::Error, |s| {
                    s.error = Some(message);
                    s.expires_at = retention_end;
                })
                .await;
            }
        }
    }

    /// Apply a state change if the graph allows it, then publish and persist.
    async fn transition(&mut self, to: CaptureStatus, apply: impl FnOnce(&mut CaptureSnapshot)) -> bool {
        let from = self.snapshot.status;
        if from.is_terminal() || !can_transition(from, to) {
            warn!(
                session = %self.snapshot.session_id,
                "Refusing capture transition {} -> {}", from, to
            );
            return false;
        }
        self.snapshot.status = to;
        apply(&mut self.snapshot);
        self.updates.send_replace(self.snapshot.clone());
        self.persist().await;
        true
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save_capture(&self.snapshot).await {
            warn!(session = %self.snapshot.session_id, "Failed to persist capture session: {:#}", e);
        }
    }
}

/// The read endpoint itself, not a sibling path that merely shares its prefix.
fn is_read_request(url: &str, path: &str) -> bool {
    let url = url.split(['?', '#']).next().unwrap_or_default();
    url.strip_suffix('/').unwrap_or(url).ends_with(path)
}

/// Inline `data:` images must carry a decodable base64 payload; plain URLs pass through.
fn check_qr_source(src: String) -> Result<String, CaptureError> {
    let Some(rest) = src.strip_prefix("data:") else {
        return Ok(src);
    };
    let payload = rest
        .split_once(";base64,")
        .map(|(_, payload)| payload)
        .ok_or_else(|| CaptureError::Automation("QR code is not a base64 image".to_string()))?;
    match base64::engine::general_purpose::STANDARD.decode(payload) {
        Ok(bytes) if !bytes.is_empty() => Ok(src),
        _ => Err(CaptureError::Automation(
            "QR code image data is corrupt".to_string(),
        )),
    }
}
