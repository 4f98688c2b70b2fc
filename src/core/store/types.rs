use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

use crate::core::credentials::Credentials;

/// One read is issued per this many seconds of requested reading time.
pub const READ_SECONDS_PER_ATTEMPT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupMethod {
    Curl,
    QrCode,
}

impl SetupMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupMethod::Curl => "curl",
            SetupMethod::QrCode => "qrcode",
        }
    }
}

impl FromStr for SetupMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "curl" => Ok(SetupMethod::Curl),
            "qrcode" => Ok(SetupMethod::QrCode),
            other => Err(format!("unknown setup method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantConfig {
    pub auth_code: String,
    pub read_seconds: u32,
    pub cron: String,
    pub method: SetupMethod,
    #[serde(skip_serializing)]
    pub credentials: Credentials,
    pub active: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantConfig {
    pub fn new(
        auth_code: impl Into<String>,
        read_seconds: u32,
        cron: impl Into<String>,
        method: SetupMethod,
        credentials: Credentials,
    ) -> Self {
        let now = Utc::now();
        Self {
            auth_code: auth_code.into(),
            read_seconds,
            cron: cron.into(),
            method,
            credentials,
            active: true,
            last_validated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.read_seconds / READ_SECONDS_PER_ATTEMPT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failure" => Ok(ExecutionStatus::Failure),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub tenant_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_count_is_one_read_per_thirty_seconds() {
        let mut tenant = TenantConfig::new("c", 600, "0 7 * * *", SetupMethod::Curl, Credentials::default());
        assert_eq!(tenant.attempt_count(), 20);
        tenant.read_seconds = 59;
        assert_eq!(tenant.attempt_count(), 1);
        tenant.read_seconds = 29;
        assert_eq!(tenant.attempt_count(), 0);
    }

    #[test]
    fn credentials_never_serialized() {
        let tenant = TenantConfig::new(
            "c",
            60,
            "0 7 * * *",
            SetupMethod::QrCode,
            Credentials::new(Default::default(), "wr_skey=secret"),
        );
        let json = serde_json::to_string(&tenant).unwrap();
        assert!(!json.contains("wr_skey"));
        assert!(json.contains("\"method\":\"qrcode\""));
    }
}
