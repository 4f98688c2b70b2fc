//! SQLite persistence for tenant configuration, the execution log and
//! capture sessions.

mod captures;
mod executions;
mod tenants;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::capture::types::CaptureSnapshot;
use crate::core::credentials::Credentials;
use crate::platform::{NativePlatform, Platform};
use types::{ExecutionRecord, ExecutionStatus, TenantConfig};

pub const DB_FILE: &str = "wxread.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tenants (
    auth_code TEXT PRIMARY KEY,
    read_seconds INTEGER NOT NULL,
    cron TEXT NOT NULL,
    method TEXT NOT NULL,
    headers_json TEXT NOT NULL,
    cookie TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    last_validated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS execution_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    status TEXT NOT NULL,
    detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_execution_log_tenant ON execution_log(tenant_id, id);

CREATE TABLE IF NOT EXISTS capture_sessions (
    session_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    qr_image TEXT,
    headers_json TEXT,
    cookie TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Configuration store: tenants keyed by authorization code.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, auth_code: &str) -> Result<Option<TenantConfig>>;
    async fn upsert(&self, tenant: &TenantConfig) -> Result<()>;
    async fn list(&self) -> Result<Vec<TenantConfig>>;
    async fn list_active(&self) -> Result<Vec<TenantConfig>>;
    /// Returns false when the tenant does not exist.
    async fn set_active(&self, auth_code: &str, active: bool) -> Result<bool>;
    async fn update_credentials(&self, auth_code: &str, credentials: &Credentials) -> Result<()>;
    async fn save_capture(&self, snapshot: &CaptureSnapshot) -> Result<()>;
    async fn load_capture(&self, session_id: &str) -> Result<Option<CaptureSnapshot>>;
    /// Remove finished capture sessions whose retention ended at or before `now`.
    async fn delete_expired_captures(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Append-only record of scheduled and manual runs.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append(&self, tenant_id: &str, start: DateTime<Utc>) -> Result<i64>;
    /// Close a RUNNING record. Fails if the record is unknown or already final.
    async fn finalize(&self, id: i64, status: ExecutionStatus, detail: &str) -> Result<()>;
    async fn latest(&self, tenant_id: &str) -> Result<Option<ExecutionRecord>>;
    async fn recent(&self, tenant_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>>;
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            fs::create_dir_all(data_dir).await?;
        }
        NativePlatform::restrict_dir_permissions(data_dir);

        let db_path = data_dir.join(DB_FILE);
        let db = Connection::open(&db_path)?;
        NativePlatform::restrict_file_permissions(&db_path);
        db.execute_batch(SCHEMA)?;
        info!("Store opened at {:?}", db_path);

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

/// In-memory store for tests.
#[cfg(test)]
pub fn test_store() -> Arc<Store> {
    Arc::new(Store::in_memory().expect("open in-memory store"))
}

pub(crate) fn to_text(time: &DateTime<Utc>) -> String {
    time.to_rfc3339()
}

pub(crate) fn parse_time(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_time(
    idx: usize,
    text: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    text.map(|t| parse_time(idx, &t)).transpose()
}

pub(crate) fn parse_enum<T: std::str::FromStr<Err = String>>(
    idx: usize,
    text: &str,
) -> rusqlite::Result<T> {
    text.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

pub(crate) fn parse_headers(
    idx: usize,
    text: &str,
) -> rusqlite::Result<std::collections::BTreeMap<String, String>> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_database_in_data_dir() {
        let tmpdir = tempfile::tempdir().unwrap();
        let dir = tmpdir.path().join("nested");
        let store = Store::open(&dir).await.unwrap();
        assert!(dir.join(DB_FILE).exists());
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopen_keeps_schema_and_rows() {
        let tmpdir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(tmpdir.path()).await.unwrap();
            store.append("code", Utc::now()).await.unwrap();
        }
        let store = Store::open(tmpdir.path()).await.unwrap();
        assert!(store.latest("code").await.unwrap().is_some());
    }

    #[test]
    fn time_text_round_trips() {
        let now = Utc::now();
        assert_eq!(parse_time(0, &to_text(&now)).unwrap(), now);
        assert!(parse_time(0, "yesterday").is_err());
    }
}
