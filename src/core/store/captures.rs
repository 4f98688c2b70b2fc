use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{Store, parse_enum, parse_headers, parse_time, to_text};
use crate::core::capture::types::CaptureSnapshot;
use crate::core::credentials::Credentials;

impl Store {
    pub(super) async fn write_capture(&self, snapshot: &CaptureSnapshot) -> Result<()> {
        let (headers_json, cookie) = match &snapshot.credentials {
            Some(c) => (Some(serde_json::to_string(&c.headers)?), Some(c.cookie.clone())),
            None => (None, None),
        };
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO capture_sessions
                (session_id, status, qr_image, headers_json, cookie, error,
                 created_at, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snapshot.session_id,
                snapshot.status.as_str(),
                snapshot.qr_image,
                headers_json,
                cookie,
                snapshot.error,
                to_text(&snapshot.created_at),
                to_text(&snapshot.expires_at),
                to_text(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub(super) async fn read_capture(&self, session_id: &str) -> Result<Option<CaptureSnapshot>> {
        let db = self.db.lock().await;
        let snapshot = db
            .query_row(
                "SELECT session_id, status, qr_image, headers_json, cookie, error,
                        created_at, expires_at
                 FROM capture_sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    let status: String = row.get(1)?;
                    let headers_json: Option<String> = row.get(3)?;
                    let cookie: Option<String> = row.get(4)?;
                    let created_at: String = row.get(6)?;
                    let expires_at: String = row.get(7)?;
                    let credentials = match (headers_json, cookie) {
                        (Some(h), Some(cookie)) => Some(Credentials {
                            headers: parse_headers(3, &h)?,
                            cookie,
                        }),
                        _ => None,
                    };
                    Ok(CaptureSnapshot {
                        session_id: row.get(0)?,
                        status: parse_enum(1, &status)?,
                        qr_image: row.get(2)?,
                        credentials,
                        error: row.get(5)?,
                        created_at: parse_time(6, &created_at)?,
                        expires_at: parse_time(7, &expires_at)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Terminal rows only; live sessions are never purged whatever their deadline.
    pub(super) async fn purge_captures(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let expired = {
            let mut stmt = db.prepare(
                "SELECT session_id, expires_at FROM capture_sessions
                 WHERE status IN ('completed', 'error', 'timeout', 'cancelled')",
            )?;
            let rows = stmt.query_map([], |row| {
                let session_id: String = row.get(0)?;
                let expires_at: String = row.get(1)?;
                Ok((session_id, parse_time(1, &expires_at)?))
            })?;
            let mut expired = Vec::new();
            for row in rows {
                let (session_id, expires_at) = row?;
                if expires_at <= now {
                    expired.push(session_id);
                }
            }
            expired
        };

        for session_id in &expired {
            db.execute(
                "DELETE FROM capture_sessions WHERE session_id = ?1",
                params![session_id],
            )?;
        }
        Ok(expired.len())
    }
}
