//! Signed read replay: N paced reads against the reader endpoint, with one
//! session renewal allowed per attempt.

use std::sync::Arc;
use std::time::Duration;

use crate::core::credentials::Credentials;
use crate::core::renewal::SessionRenewer;
use crate::core::signer::RequestSigner;
use crate::core::transport::HttpTransport;

/// Key whose presence in the response object marks an accepted read.
const ACCEPTED_KEY: &str = "succ";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("credentials are missing headers or cookie")]
    MissingCredentials,
    #[error("read {attempt}/{total} returned HTTP {status}")]
    Status { attempt: u32, total: u32, status: u16 },
    #[error("read {attempt}/{total} failed: {detail}")]
    Transport {
        attempt: u32,
        total: u32,
        detail: String,
    },
    #[error("read {attempt}/{total} rejected and the session could not be renewed")]
    RenewalUnavailable { attempt: u32, total: u32 },
    #[error("read {attempt}/{total} rejected again after session renewal")]
    RejectedAfterRenewal { attempt: u32, total: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub successes: u32,
    pub renewals: u32,
    /// Credentials as they stand after the run, including any renewed key.
    pub credentials: Credentials,
}

impl ReplayReport {
    pub fn summary(&self) -> String {
        if self.renewals == 0 {
            format!("completed {} reads", self.successes)
        } else {
            format!(
                "completed {} reads ({} session renewals)",
                self.successes, self.renewals
            )
        }
    }
}

pub struct ReplayEngine {
    transport: Arc<dyn HttpTransport>,
    signer: RequestSigner,
    renewer: SessionRenewer,
    read_url: String,
    pacing: Duration,
}

impl ReplayEngine {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        signer: RequestSigner,
        renewer: SessionRenewer,
        read_url: impl Into<String>,
        pacing: Duration,
    ) -> Self {
        Self {
            transport,
            signer,
            renewer,
            read_url: read_url.into(),
            pacing,
        }
    }

    /// True iff every one of `attempt_count` reads was accepted.
    pub async fn replay(&self, credentials: &Credentials, attempt_count: u32) -> bool {
        match self.run(credentials, attempt_count).await {
            Ok(report) => report.successes == attempt_count,
            Err(e) => {
                tracing::warn!("Replay failed: {}", e);
                false
            }
        }
    }

    pub async fn run(
        &self,
        credentials: &Credentials,
        attempt_count: u32,
    ) -> Result<ReplayReport, ReplayError> {
        if !credentials.is_complete() {
            return Err(ReplayError::MissingCredentials);
        }

        let mut current = credentials.clone();
        let mut successes = 0;
        let mut renewals = 0;
        let mut attempt = 0;
        let mut renewed_this_attempt = false;

        while attempt < attempt_count {
            let index = attempt + 1;
            let signed = self.signer.sign_now();
            let reply = self
                .transport
                .post(
                    &self.read_url,
                    &current.headers,
                    &current.cookie,
                    signed.to_body(),
                )
                .await
                .map_err(|e| ReplayError::Transport {
                    attempt: index,
                    total: attempt_count,
                    detail: format!("{:#}", e),
                })?;

            if reply.status != 200 {
                return Err(ReplayError::Status {
                    attempt: index,
                    total: attempt_count,
                    status: reply.status,
                });
            }

            if is_accepted(&reply.body) {
                successes += 1;
                attempt += 1;
                renewed_this_attempt = false;
                tracing::debug!("Read {}/{} accepted", index, attempt_count);
                if attempt < attempt_count {
                    tokio::time::sleep(self.pacing).await;
                }
                continue;
            }

            if renewed_this_attempt {
                return Err(ReplayError::RejectedAfterRenewal {
                    attempt: index,
                    total: attempt_count,
                });
            }

            tracing::info!(
                "Read {}/{} rejected, renewing session key",
                index,
                attempt_count
            );
            let Some(key) = self.renewer.renew(&current).await else {
                return Err(ReplayError::RenewalUnavailable {
                    attempt: index,
                    total: attempt_count,
                });
            };
            current = current.with_session_key(&key);
            renewals += 1;
            renewed_this_attempt = true;
        }

        Ok(ReplayReport {
            successes,
            renewals,
            credentials: current,
        })
    }
}

fn is_accepted(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.as_object().map(|o| o.contains_key(ACCEPTED_KEY)))
        .unwrap_or(false)
}
