use anyhow::{Result, bail};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::signer::ReadFields;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub replay: ReplayConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Code that may list every tenant's tasks.
    #[serde(default = "default_admin_code")]
    pub admin_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_secret")]
    pub secret: String,

    /// Fixed fields of every read request (book, chapter, progress...).
    #[serde(default = "default_template")]
    pub template: ReadFields,

    #[serde(default = "default_reader_url")]
    pub reader_url: String,

    /// Chapter page whose load fires the read request we intercept.
    #[serde(default = "default_trigger_url")]
    pub trigger_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_read_interval")]
    pub read_interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub validate_on_setup: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_qr_wait")]
    pub qr_wait_secs: u64,

    #[serde(default = "default_login_poll_attempts")]
    pub login_poll_attempts: u32,

    #[serde(default = "default_login_poll_interval")]
    pub login_poll_interval_ms: u64,

    #[serde(default = "default_intercept_wait")]
    pub intercept_wait_secs: u64,

    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    #[serde(default = "default_true")]
    pub headless: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_admin_code() -> String {
    "admin".to_string()
}
fn default_base_url() -> String {
    "https://weread.qq.com".to_string()
}
fn default_secret() -> String {
    "3c5c8717f3daf09iop3423zafeqoi".to_string()
}
fn default_reader_url() -> String {
    "https://weread.qq.com/web/reader/ce032b305a9bc1ce0b0dd2a".to_string()
}
fn default_trigger_url() -> String {
    "https://weread.qq.com/web/reader/ce032b305a9bc1ce0b0dd2akc9e32940268c9e1074f5bc6"
        .to_string()
}
fn default_read_interval() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_qr_wait() -> u64 {
    30
}
fn default_login_poll_attempts() -> u32 {
    60
}
fn default_login_poll_interval() -> u64 {
    1000
}
fn default_intercept_wait() -> u64 {
    15
}
fn default_retention() -> u64 {
    300
}
fn default_grace() -> u64 {
    3600
}

fn default_template() -> ReadFields {
    let fields = json!({
        "appId": "wb182564874663h152492176",
        "b": "ce032b305a9bc1ce0b0dd2a",
        "c": "7f632b502707f6ffaa6bf2e",
        "ci": 27,
        "co": 389,
        "sm": "19聚会那天，在一间办公室里，几个人",
        "pr": 74,
        "rt": 15,
        "ps": "4ee326507a65a465g015fae",
        "pc": "aab32e207a65a466g010615"
    });
    match fields {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => ReadFields::new(),
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            target: TargetConfig::default(),
            replay: ReplayConfig::default(),
            capture: CaptureConfig::default(),
            scheduler: SchedulerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_code: default_admin_code(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            secret: default_secret(),
            template: default_template(),
            reader_url: default_reader_url(),
            trigger_url: default_trigger_url(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            read_interval_secs: default_read_interval(),
            request_timeout_secs: default_request_timeout(),
            validate_on_setup: true,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            qr_wait_secs: default_qr_wait(),
            login_poll_attempts: default_login_poll_attempts(),
            login_poll_interval_ms: default_login_poll_interval(),
            intercept_wait_secs: default_intercept_wait(),
            retention_secs: default_retention(),
            headless: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace(),
        }
    }
}

impl TargetConfig {
    pub fn read_url(&self) -> String {
        format!("{}/web/book/read", self.base_url.trim_end_matches('/'))
    }

    pub fn renewal_url(&self) -> String {
        format!("{}/web/login/renewal", self.base_url.trim_end_matches('/'))
    }
}

impl ReplayConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.read_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CaptureConfig {
    pub fn qr_wait(&self) -> Duration {
        Duration::from_secs(self.qr_wait_secs)
    }

    pub fn login_poll_interval(&self) -> Duration {
        Duration::from_millis(self.login_poll_interval_ms)
    }

    pub fn intercept_wait(&self) -> Duration {
        Duration::from_secs(self.intercept_wait_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl AppConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config = Self::from_toml_str(&content)?;
        info!(
            "Loaded config: api={}:{}, target={}, pacing={}s, grace={}s",
            config.server.host,
            config.server.port,
            config.target.base_url,
            config.replay.read_interval_secs,
            config.scheduler.grace_secs
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.admin_code.trim().is_empty() {
            bail!("server.admin_code must not be empty");
        }
        if self.target.secret.is_empty() {
            bail!("target.secret must not be empty");
        }
        if self.target.template.is_empty() {
            bail!("target.template must contain the fixed read fields");
        }
        if self.capture.login_poll_attempts == 0 {
            bail!("capture.login_poll_attempts must be at least 1");
        }
        Ok(())
    }
}
