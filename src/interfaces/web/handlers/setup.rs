use axum::{Json, extract::State};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::super::AppState;
use crate::core::capture::types::CaptureStatus;
use crate::core::credentials::Credentials;
use crate::core::scheduler::cron::CronSpec;
use crate::core::store::TenantStore;
use crate::core::store::types::{SetupMethod, TenantConfig};

const MAX_READ_MINUTES: u32 = 24 * 60;

#[derive(serde::Deserialize)]
pub struct SetupRequest {
    auth_code: String,
    read_time_minutes: u32,
    schedule_time: String,
    #[serde(default)]
    bash_request: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

fn failure(error: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({
        "success": false,
        "error": error.to_string()
    }))
}

pub async fn setup_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<SetupRequest>,
) -> Json<serde_json::Value> {
    let auth_code = payload.auth_code.trim().to_string();
    if auth_code.is_empty() {
        return failure("auth_code is required");
    }
    if !(1..=MAX_READ_MINUTES).contains(&payload.read_time_minutes) {
        return failure(format!(
            "read_time_minutes must be between 1 and {}",
            MAX_READ_MINUTES
        ));
    }
    let spec = match CronSpec::daily_at(&payload.schedule_time) {
        Ok(spec) => spec,
        Err(e) => return failure(e),
    };

    let (method, credentials) = match resolve_credentials(&state, &payload).await {
        Ok(resolved) => resolved,
        Err(e) => return failure(e),
    };

    let mut validated_at = None;
    let mut credentials = credentials;
    if state.config.replay.validate_on_setup {
        match state.scheduler.engine().run(&credentials, 1).await {
            Ok(report) => {
                credentials = report.credentials;
                validated_at = Some(Utc::now());
            }
            Err(e) => {
                warn!(tenant = %auth_code, "Setup validation failed: {}", e);
                return failure(format!("credentials were not accepted: {}", e));
            }
        }
    }

    let mut tenant = TenantConfig::new(
        auth_code.clone(),
        payload.read_time_minutes * 60,
        spec.to_string(),
        method,
        credentials,
    );
    tenant.last_validated_at = validated_at;

    if let Err(e) = state.store.upsert(&tenant).await {
        return failure(format!("failed to store configuration: {:#}", e));
    }
    let attempt_count = tenant.attempt_count();
    if let Err(e) = state
        .scheduler
        .schedule(&auth_code, &tenant.cron, attempt_count)
        .await
    {
        return failure(format!("configuration saved but scheduling failed: {}", e));
    }
    info!(tenant = %auth_code, method = method.as_str(), "Tenant configured");

    let next_run = state
        .scheduler
        .next_run(&auth_code)
        .await
        .map(|t| t.to_rfc3339());
    Json(json!({
        "success": true,
        "message": format!("Reading task scheduled daily at {}", payload.schedule_time.trim()),
        "auth_code": auth_code,
        "cron": tenant.cron,
        "attempt_count": attempt_count,
        "next_run": next_run
    }))
}

/// A curl command wins over a capture session when both are given.
async fn resolve_credentials(
    state: &AppState,
    payload: &SetupRequest,
) -> Result<(SetupMethod, Credentials), String> {
    if let Some(command) = payload
        .bash_request
        .as_deref()
        .filter(|c| !c.trim().is_empty())
    {
        let credentials = Credentials::from_curl(command).map_err(|e| e.to_string())?;
        return Ok((SetupMethod::Curl, credentials));
    }

    let Some(session_id) = payload
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Err("either bash_request or session_id is required".to_string());
    };

    let snapshot = match state.captures.status(session_id).await {
        Some(snapshot) => Some(snapshot),
        None => state
            .store
            .load_capture(session_id)
            .await
            .map_err(|e| format!("failed to load capture session: {:#}", e))?
            .filter(|stored| !stored.has_lapsed(Utc::now())),
    };
    let Some(snapshot) = snapshot else {
        return Err(format!("capture session {} not found", session_id));
    };
    if snapshot.status != CaptureStatus::Completed {
        return Err(format!(
            "capture session is {}, not completed",
            snapshot.status
        ));
    }
    match snapshot.credentials {
        Some(credentials) if credentials.is_complete() => Ok((SetupMethod::QrCode, credentials)),
        _ => Err("capture session holds no usable credentials".to_string()),
    }
}
