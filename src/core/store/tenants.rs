use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::types::TenantConfig;
use super::{
    Store, TenantStore, parse_enum, parse_headers, parse_opt_time, parse_time, to_text,
};
use crate::core::capture::types::CaptureSnapshot;
use crate::core::credentials::Credentials;

const TENANT_COLUMNS: &str = "auth_code, read_seconds, cron, method, headers_json, cookie, \
     active, last_validated_at, created_at, updated_at";

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<TenantConfig> {
    let method: String = row.get(3)?;
    let headers_json: String = row.get(4)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(TenantConfig {
        auth_code: row.get(0)?,
        read_seconds: row.get(1)?,
        cron: row.get(2)?,
        method: parse_enum(3, &method)?,
        credentials: Credentials {
            headers: parse_headers(4, &headers_json)?,
            cookie: row.get(5)?,
        },
        active: row.get(6)?,
        last_validated_at: parse_opt_time(7, row.get(7)?)?,
        created_at: parse_time(8, &created_at)?,
        updated_at: parse_time(9, &updated_at)?,
    })
}

#[async_trait]
impl TenantStore for Store {
    async fn get(&self, auth_code: &str) -> Result<Option<TenantConfig>> {
        let db = self.db.lock().await;
        let tenant = db
            .query_row(
                &format!("SELECT {} FROM tenants WHERE auth_code = ?1", TENANT_COLUMNS),
                params![auth_code],
                tenant_from_row,
            )
            .optional()?;
        Ok(tenant)
    }

    async fn upsert(&self, tenant: &TenantConfig) -> Result<()> {
        let headers_json = serde_json::to_string(&tenant.credentials.headers)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO tenants (auth_code, read_seconds, cron, method, headers_json, cookie,
                                  active, last_validated_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(auth_code) DO UPDATE SET
                read_seconds = excluded.read_seconds,
                cron = excluded.cron,
                method = excluded.method,
                headers_json = excluded.headers_json,
                cookie = excluded.cookie,
                active = excluded.active,
                last_validated_at = excluded.last_validated_at,
                updated_at = excluded.updated_at",
            params![
                tenant.auth_code,
                tenant.read_seconds,
                tenant.cron,
                tenant.method.as_str(),
                headers_json,
                tenant.credentials.cookie,
                tenant.active,
                tenant.last_validated_at.as_ref().map(to_text),
                to_text(&tenant.created_at),
                to_text(&tenant.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TenantConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM tenants ORDER BY created_at",
            TENANT_COLUMNS
        ))?;
        let rows = stmt.query_map([], tenant_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn list_active(&self) -> Result<Vec<TenantConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM tenants WHERE active = 1 ORDER BY created_at",
            TENANT_COLUMNS
        ))?;
        let rows = stmt.query_map([], tenant_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn set_active(&self, auth_code: &str, active: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE tenants SET active = ?2, updated_at = ?3 WHERE auth_code = ?1",
            params![auth_code, active, to_text(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    async fn update_credentials(&self, auth_code: &str, credentials: &Credentials) -> Result<()> {
        let headers_json = serde_json::to_string(&credentials.headers)?;
        let db = self.db.lock().await;
        db.execute(
            "UPDATE tenants SET headers_json = ?2, cookie = ?3, updated_at = ?4
             WHERE auth_code = ?1",
            params![
                auth_code,
                headers_json,
                credentials.cookie,
                to_text(&Utc::now())
            ],
        )?;
        Ok(())
    }

    async fn save_capture(&self, snapshot: &CaptureSnapshot) -> Result<()> {
        self.write_capture(snapshot).await
    }

    async fn load_capture(&self, session_id: &str) -> Result<Option<CaptureSnapshot>> {
        self.read_capture(session_id).await
    }

    async fn delete_expired_captures(&self, now: DateTime<Utc>) -> Result<usize> {
        self.purge_captures(now).await
    }
}
