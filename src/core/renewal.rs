use std::sync::Arc;

use crate::core::credentials::Credentials;
use crate::core::transport::HttpTransport;

/// Body the web client posts when its session key has lapsed.
pub const RENEWAL_PAYLOAD: &str = r#"{"rq":"%2Fweb%2Fbook%2Fread"}"#;
pub const SESSION_COOKIE: &str = "wr_skey";
pub const SESSION_KEY_LEN: usize = 8;

pub struct SessionRenewer {
    transport: Arc<dyn HttpTransport>,
    url: String,
}

impl SessionRenewer {
    pub fn new(transport: Arc<dyn HttpTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    /// Ask the service for a fresh session key. `None` means renewal is not possible.
    pub async fn renew(&self, credentials: &Credentials) -> Option<String> {
        let reply = match self
            .transport
            .post(
                &self.url,
                &credentials.headers,
                &credentials.cookie,
                RENEWAL_PAYLOAD.to_string(),
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Session renewal request failed: {:#}", e);
                return None;
            }
        };

        let key = extract_session_key(&reply.set_cookies);
        match &key {
            Some(_) => tracing::info!("Session key renewed"),
            None => tracing::warn!(
                "Renewal response (status {}) carried no {} cookie",
                reply.status,
                SESSION_COOKIE
            ),
        }
        key
    }
}

/// Find `wr_skey=` in any Set-Cookie directive; value truncated to the key length.
pub fn extract_session_key(set_cookies: &[String]) -> Option<String> {
    set_cookies
        .iter()
        .flat_map(|directive| directive.split(';'))
        .find_map(|part| {
            // Folded headers may join several cookies with commas.
            let entry = part.rsplit(',').next().unwrap_or(part).trim();
            let (name, value) = entry.split_once('=')?;
            (name.trim() == SESSION_COOKIE).then(|| value.trim().to_string())
        })
        .map(|value| value.chars().take(SESSION_KEY_LEN).collect::<String>())
        .filter(|value| !value.is_empty())
}
