use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::types::{ExecutionRecord, ExecutionStatus};
use super::{ExecutionLog, Store, parse_enum, parse_opt_time, parse_time, to_text};

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let start_time: String = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        start_time: parse_time(2, &start_time)?,
        end_time: parse_opt_time(3, row.get(3)?)?,
        status: parse_enum(4, &status)?,
        detail: row.get(5)?,
    })
}

#[async_trait]
impl ExecutionLog for Store {
    async fn append(&self, tenant_id: &str, start: DateTime<Utc>) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO execution_log (tenant_id, start_time, status) VALUES (?1, ?2, ?3)",
            params![tenant_id, to_text(&start), ExecutionStatus::Running.as_str()],
        )?;
        Ok(db.last_insert_rowid())
    }

    async fn finalize(&self, id: i64, status: ExecutionStatus, detail: &str) -> Result<()> {
        if status == ExecutionStatus::Running {
            bail!("execution {} cannot be finalized as running", id);
        }
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE execution_log SET status = ?2, detail = ?3, end_time = ?4
             WHERE id = ?1 AND status = ?5",
            params![
                id,
                status.as_str(),
                detail,
                to_text(&Utc::now()),
                ExecutionStatus::Running.as_str()
            ],
        )?;
        if changed == 0 {
            bail!("execution {} is unknown or already finalized", id);
        }
        Ok(())
    }

    async fn latest(&self, tenant_id: &str) -> Result<Option<ExecutionRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT id, tenant_id, start_time, end_time, status, detail
                 FROM execution_log WHERE tenant_id = ?1 ORDER BY id DESC LIMIT 1",
                params![tenant_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn recent(&self, tenant_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, start_time, end_time, status, detail
             FROM execution_log WHERE tenant_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant_id, limit as i64], record_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
