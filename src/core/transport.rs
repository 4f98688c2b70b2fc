use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use std::collections::BTreeMap;
use std::time::Duration;

/// Headers that the client library manages itself or that we set explicitly.
const SKIPPED_HEADERS: [&str; 5] = [
    "cookie",
    "content-length",
    "host",
    "accept-encoding",
    "connection",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub set_cookies: Vec<String>,
    pub body: String,
}

/// The single HTTP operation the replay path needs.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        cookie: &str,
        body: String,
    ) -> Result<HttpReply>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

fn header_map(headers: &BTreeMap<String, String>, cookie: &str) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::debug!("Dropping unsendable header {}", name);
            continue;
        };
        map.insert(name, value);
    }
    if let Ok(value) = HeaderValue::from_str(cookie) {
        map.insert(COOKIE, value);
    }
    if !map.contains_key(CONTENT_TYPE) {
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    map
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        cookie: &str,
        body: String,
    ) -> Result<HttpReply> {
        let response = self
            .client
            .post(url)
            .headers(header_map(headers, cookie))
            .body(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;

        Ok(HttpReply {
            status,
            set_cookies,
            body,
        })
    }
}
