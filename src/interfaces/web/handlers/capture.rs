use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;

use super::super::AppState;
use crate::core::capture::CaptureError;
use crate::core::capture::types::CaptureSnapshot;
use crate::core::store::TenantStore;

fn not_found(session_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": format!("capture session {} not found", session_id)
        })),
    )
        .into_response()
}

/// Status projection; credentials never leave the server.
fn projection(snapshot: &CaptureSnapshot) -> serde_json::Value {
    json!({
        "success": true,
        "session_id": snapshot.session_id,
        "status": snapshot.status.as_str(),
        "message": snapshot.error.as_deref().unwrap_or(snapshot.status.message()),
        "qrcode": snapshot.qr_image,
        "has_credentials": snapshot.credentials.is_some(),
        "created_at": snapshot.created_at.to_rfc3339(),
        "expires_at": snapshot.expires_at.to_rfc3339()
    })
}

pub async fn start_capture_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.captures.start().await {
        Ok(started) => Json(json!({
            "success": true,
            "session_id": started.session_id,
            "qrcode": started.qr_image,
            "expires_at": started.expires_at.to_rfc3339()
        })),
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string()
        })),
    }
}

pub async fn capture_status_endpoint(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if let Some(snapshot) = state.captures.status(&session_id).await {
        return Json(projection(&snapshot)).into_response();
    }
    // Sessions from before a restart only live in the store, until their retention ends.
    match state.store.load_capture(&session_id).await {
        Ok(Some(snapshot)) if !snapshot.has_lapsed(Utc::now()) => {
            Json(projection(&snapshot)).into_response()
        }
        Ok(_) => not_found(&session_id),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": format!("{:#}", e)
            })),
        )
            .into_response(),
    }
}

pub async fn cancel_capture_endpoint(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.captures.cancel(&session_id).await {
        Ok(snapshot) => Json(projection(&snapshot)).into_response(),
        Err(CaptureError::NotFound(_)) => not_found(&session_id),
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string()
        }))
        .into_response(),
    }
}
