use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};

use super::super::AppState;
use crate::core::store::{ExecutionLog, TenantStore};

const RECENT_EXECUTIONS: usize = 20;

#[derive(serde::Deserialize)]
pub struct TasksQuery {
    #[serde(default)]
    auth_code: Option<String>,
}

fn error_response(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": error.to_string()
        })),
    )
        .into_response()
}

pub async fn list_tasks_endpoint(
    Query(query): Query<TasksQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let Some(caller) = query
        .auth_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    else {
        return Json(json!({
            "success": false,
            "error": "auth_code is required"
        }));
    };
    let is_admin = caller == state.config.server.admin_code;

    let mut tasks = Vec::new();
    for job in state.scheduler.jobs().await {
        if !is_admin && job.tenant_id != caller {
            continue;
        }
        let tenant = match state.store.get(&job.tenant_id).await {
            Ok(tenant) => tenant,
            Err(e) => {
                warn!(tenant = %job.tenant_id, "Failed to load tenant for listing: {:#}", e);
                None
            }
        };
        let last_run = state.store.latest(&job.tenant_id).await.ok().flatten();
        let next_run = state
            .scheduler
            .next_run(&job.tenant_id)
            .await
            .map(|t| t.to_rfc3339());

        tasks.push(json!({
            "auth_code": job.tenant_id,
            "cron": job.cron,
            "attempt_count": job.attempt_count,
            "next_run": next_run,
            "read_time_minutes": tenant.as_ref().map(|t| t.read_seconds / 60),
            "method": tenant.as_ref().map(|t| t.method.as_str()),
            "active": tenant.as_ref().is_some_and(|t| t.active),
            "last_validated_at": tenant.as_ref().and_then(|t| t.last_validated_at).map(|t| t.to_rfc3339()),
            "last_run": last_run
        }));
    }

    Json(json!({
        "success": true,
        "tasks": tasks
    }))
}

pub async fn delete_task_endpoint(
    Path(auth_code): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.store.set_active(&auth_code, false).await {
        Ok(true) => {}
        Ok(false) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("no configuration for {}", auth_code),
            );
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
    if let Err(e) = state.scheduler.unschedule(&auth_code).await {
        warn!(tenant = %auth_code, "Failed to remove job: {}", e);
    }
    info!(tenant = %auth_code, "Reading task deactivated");

    Json(json!({
        "success": true,
        "message": format!("Reading task for {} deactivated", auth_code)
    }))
    .into_response()
}

pub async fn run_task_endpoint(
    Path(auth_code): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.store.get(&auth_code).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("no configuration for {}", auth_code),
            );
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }

    // The handle is dropped; the outcome lands in the execution log.
    let _ = state.scheduler.run_now(&auth_code);
    Json(json!({
        "success": true,
        "message": format!("Reading session for {} started", auth_code)
    }))
    .into_response()
}

pub async fn list_executions_endpoint(
    Path(auth_code): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.recent(&auth_code, RECENT_EXECUTIONS).await {
        Ok(records) => Json(json!({
            "success": true,
            "executions": records
        })),
        Err(e) => Json(json!({
            "success": false,
            "error": format!("{:#}", e)
        })),
    }
}
