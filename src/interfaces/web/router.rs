use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{capture, setup, tasks};

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/setup", post(setup::setup_endpoint))
        .route("/api/capture", post(capture::start_capture_endpoint))
        .route(
            "/api/capture/{session_id}",
            get(capture::capture_status_endpoint),
        )
        .route(
            "/api/capture/{session_id}/cancel",
            post(capture::cancel_capture_endpoint),
        )
        .route("/api/tasks", get(tasks::list_tasks_endpoint))
        .route(
            "/api/tasks/{auth_code}",
            axum::routing::delete(tasks::delete_task_endpoint),
        )
        .route("/api/tasks/{auth_code}/run", post(tasks::run_task_endpoint))
        .route(
            "/api/tasks/{auth_code}/executions",
            get(tasks::list_executions_endpoint),
        )
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors())
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::capture::CaptureManager;
    use crate::core::capture::CaptureSettings;
    use crate::core::capture::driver::UnavailableDriverFactory;
    use crate::core::capture::types::{CaptureSnapshot, CaptureStatus};
    use crate::core::config::AppConfig;
    use crate::core::credentials::Credentials;
    use crate::core::renewal::SessionRenewer;
    use crate::core::replay::ReplayEngine;
    use crate::core::scheduler::TaskScheduler;
    use crate::core::signer::RequestSigner;
    use crate::core::store::types::{SetupMethod, TenantConfig};
    use crate::core::store::{ExecutionLog, Store, TenantStore, test_store};
    use crate::core::transport::testing::StubTransport;
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_cron_scheduler::JobScheduler;
    use tower::util::ServiceExt;

    const CURL: &str = "curl 'https://weread.qq.com/web/book/read' \
        -H 'accept: application/json' \
        -H 'user-agent: Mozilla/5.0' \
        -b 'wr_vid=1; wr_skey=abcdefgh' \
        --data-raw '{}'";

    pub(crate) struct TestApp {
        pub router: Router,
        pub store: Arc<Store>,
        pub transport: Arc<StubTransport>,
    }

    pub(crate) async fn test_app(transport: StubTransport) -> TestApp {
        let config = AppConfig::default();
        let store = test_store();
        let transport = Arc::new(transport);
        let engine = Arc::new(ReplayEngine::new(
            transport.clone(),
            RequestSigner::new(config.target.template.clone(), config.target.secret.clone()),
            SessionRenewer::new(transport.clone(), config.target.renewal_url()),
            config.target.read_url(),
            Duration::ZERO,
        ));
        let scheduler = TaskScheduler::new(
            JobScheduler::new().await.unwrap(),
            store.clone(),
            store.clone(),
            engine,
            Duration::from_secs(3600),
        );
        let captures = Arc::new(CaptureManager::new(
            Arc::new(UnavailableDriverFactory),
            store.clone(),
            CaptureSettings::from_config(&config),
        ));
        let (log_tx, _) = tokio::sync::broadcast::channel(16);

        let state = AppState {
            config: Arc::new(config),
            store: store.clone(),
            scheduler,
            captures,
            log_tx,
        };
        TestApp {
            router: build_api_router(state),
            store,
            transport,
        }
    }

    pub(crate) async fn json_request(
        app: &Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    fn stored_tenant(code: &str) -> TenantConfig {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "*/*".to_string());
        TenantConfig::new(
            code,
            600,
            "0 7 * * *",
            SetupMethod::Curl,
            Credentials::new(headers, "wr_vid=1; wr_skey=abcdefgh"),
        )
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = test_app(StubTransport::accepting()).await;
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/tasks?auth_code=admin")
            .body(Body::empty())
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
    }

    #[tokio::test]
    async fn setup_with_curl_validates_stores_and_schedules() {
        let app = test_app(StubTransport::accepting()).await;
        let (status, body) = json_request(
            &app.router,
            Method::POST,
            "/api/setup",
            Some(json!({
                "auth_code": "reader1",
                "read_time_minutes": 10,
                "schedule_time": "07:30",
                "bash_request": CURL
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true, "{}", body);
        assert_eq!(body["cron"], "30 7 * * *");
        assert_eq!(body["attempt_count"], 20);
        assert_eq!(app.transport.read_calls().len(), 1);

        let tenant = app.store.get("reader1").await.unwrap().unwrap();
        assert!(tenant.active);
        assert_eq!(tenant.read_seconds, 600);
        assert_eq!(tenant.method, SetupMethod::Curl);
        assert!(tenant.last_validated_at.is_some());
        assert_eq!(tenant.credentials.cookie, "wr_vid=1; wr_skey=abcdefgh");

        let (_, tasks) =
            json_request(&app.router, Method::GET, "/api/tasks?auth_code=reader1", None).await;
        assert_eq!(tasks["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(tasks["tasks"][0]["cron"], "30 7 * * *");
    }

    #[tokio::test]
    async fn setup_rejects_bad_input() {
        let app = test_app(StubTransport::accepting()).await;
        let cases = [
            json!({"auth_code": "", "read_time_minutes": 10, "schedule_time": "07:30", "bash_request": CURL}),
            json!({"auth_code": "a", "read_time_minutes": 0, "schedule_time": "07:30", "bash_request": CURL}),
            json!({"auth_code": "a", "read_time_minutes": 1441, "schedule_time": "07:30", "bash_request": CURL}),
            json!({"auth_code": "a", "read_time_minutes": 10, "schedule_time": "7h", "bash_request": CURL}),
            json!({"auth_code": "a", "read_time_minutes": 10, "schedule_time": "07:30"}),
            json!({"auth_code": "a", "read_time_minutes": 10, "schedule_time": "07:30", "bash_request": "curl 'https://x'"}),
        ];
        for case in cases {
            let (_, body) = json_request(&app.router, Method::POST, "/api/setup", Some(case.clone())).await;
            assert_eq!(body["success"], false, "{}", case);
            assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
        }
        assert!(app.store.list().await.unwrap().is_empty());
        assert!(app.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn setup_refuses_credentials_the_service_rejects() {
        let app = test_app(StubTransport::rejecting()).await;
        let (_, body) = json_request(
            &app.router,
            Method::POST,
            "/api/setup",
            Some(json!({
                "auth_code": "reader1",
                "read_time_minutes": 10,
                "schedule_time": "07:30",
                "bash_request": CURL
            })),
        )
        .await;

        assert_eq!(body["success"], false);
        assert!(app.store.get("reader1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn setup_accepts_a_completed_capture_session() {
        let app = test_app(StubTransport::accepting()).await;
        let (now, retention) = (Utc::now(), chrono::Duration::minutes(5));
        let mut snapshot = CaptureSnapshot::new("sess-1".to_string(), now, now + retention);
        snapshot.status = CaptureStatus::Completed;
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "*/*".to_string());
        snapshot.credentials = Some(Credentials::new(headers, "wr_vid=2; wr_skey=qqqqqqqq"));
        app.store.save_capture(&snapshot).await.unwrap();

        let (_, body) = json_request(
            &app.router,
            Method::POST,
            "/api/setup",
            Some(json!({
                "auth_code": "reader2",
                "read_time_minutes": 1,
                "schedule_time": "21:05",
                "session_id": "sess-1"
            })),
        )
        .await;

        assert_eq!(body["success"], true, "{}", body);
        let tenant = app.store.get("reader2").await.unwrap().unwrap();
        assert_eq!(tenant.method, SetupMethod::QrCode);
        assert_eq!(tenant.credentials.cookie, "wr_vid=2; wr_skey=qqqqqqqq");
        assert_eq!(tenant.cron, "5 21 * * *");
    }

    #[tokio::test]
    async fn setup_refuses_an_unfinished_capture_session() {
        let app = test_app(StubTransport::accepting()).await;
        let (now, retention) = (Utc::now(), chrono::Duration::minutes(5));
        let mut snapshot = CaptureSnapshot::new("sess-2".to_string(), now, now + retention);
        snapshot.status = CaptureStatus::WaitingForScan;
        app.store.save_capture(&snapshot).await.unwrap();

        for session in ["sess-2", "nope"] {
            let (_, body) = json_request(
                &app.router,
                Method::POST,
                "/api/setup",
                Some(json!({
                    "auth_code": "reader2",
                    "read_time_minutes": 5,
                    "schedule_time": "21:05",
                    "session_id": session
                })),
            )
            .await;
            assert_eq!(body["success"], false, "{}", session);
        }
    }

    #[tokio::test]
    async fn capture_start_without_browser_reports_failure() {
        let app = test_app(StubTransport::accepting()).await;
        let (status, body) = json_request(&app.router, Method::POST, "/api/capture", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("browser"));
    }

    #[tokio::test]
    async fn unknown_capture_session_is_not_found() {
        let app = test_app(StubTransport::accepting()).await;
        let (status, body) =
            json_request(&app.router, Method::GET, "/api/capture/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) =
            json_request(&app.router, Method::POST, "/api/capture/missing/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn persisted_capture_status_is_served_without_credentials() {
        let app = test_app(StubTransport::accepting()).await;
        let (now, retention) = (Utc::now(), chrono::Duration::minutes(5));
        let mut snapshot = CaptureSnapshot::new("sess-3".to_string(), now, now + retention);
        snapshot.status = CaptureStatus::Completed;
        snapshot.credentials = Some(Credentials::new(BTreeMap::new(), "wr_skey=secret12"));
        app.store.save_capture(&snapshot).await.unwrap();

        let (status, body) =
            json_request(&app.router, Method::GET, "/api/capture/sess-3", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["has_credentials"], true);
        assert!(!body.to_string().contains("secret12"));
    }

    #[tokio::test]
    async fn lapsed_capture_session_is_gone() {
        let app = test_app(StubTransport::accepting()).await;
        let now = Utc::now();
        let mut snapshot = CaptureSnapshot::new(
            "sess-4".to_string(),
            now - chrono::Duration::minutes(10),
            now - chrono::Duration::seconds(1),
        );
        snapshot.status = CaptureStatus::Completed;
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "*/*".to_string());
        snapshot.credentials = Some(Credentials::new(headers, "wr_vid=4; wr_skey=oldoldold"));
        app.store.save_capture(&snapshot).await.unwrap();

        let (status, _) =
            json_request(&app.router, Method::GET, "/api/capture/sess-4", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = json_request(
            &app.router,
            Method::POST,
            "/api/setup",
            Some(json!({
                "auth_code": "reader4",
                "read_time_minutes": 1,
                "schedule_time": "21:05",
                "session_id": "sess-4"
            })),
        )
        .await;
        assert_eq!(body["success"], false, "{}", body);
        assert!(app.store.get("reader4").await.unwrap().is_none());
        // The status lookup already purged the row.
        assert!(app.store.load_capture("sess-4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tasks_are_scoped_to_the_caller_unless_admin() {
        let app = test_app(StubTransport::accepting()).await;
        for code in ["alpha", "beta"] {
            let (_, body) = json_request(
                &app.router,
                Method::POST,
                "/api/setup",
                Some(json!({
                    "auth_code": code,
                    "read_time_minutes": 10,
                    "schedule_time": "07:30",
                    "bash_request": CURL
                })),
            )
            .await;
            assert_eq!(body["success"], true);
        }

        let (_, own) =
            json_request(&app.router, Method::GET, "/api/tasks?auth_code=alpha", None).await;
        let own = own["tasks"].as_array().unwrap().clone();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0]["auth_code"], "alpha");
        assert!(own[0]["next_run"].is_string());

        let (_, all) =
            json_request(&app.router, Method::GET, "/api/tasks?auth_code=admin", None).await;
        assert_eq!(all["tasks"].as_array().unwrap().len(), 2);

        let (_, missing) = json_request(&app.router, Method::GET, "/api/tasks", None).await;
        assert_eq!(missing["success"], false);
    }

    #[tokio::test]
    async fn delete_deactivates_and_unschedules() {
        let app = test_app(StubTransport::accepting()).await;
        app.store.upsert(&stored_tenant("alpha")).await.unwrap();

        let (status, body) =
            json_request(&app.router, Method::DELETE, "/api/tasks/alpha", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(!app.store.get("alpha").await.unwrap().unwrap().active);

        let (status, _) =
            json_request(&app.router, Method::DELETE, "/api/tasks/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_now_records_an_execution() {
        let app = test_app(StubTransport::accepting()).await;
        let mut tenant = stored_tenant("alpha");
        tenant.read_seconds = 60;
        app.store.upsert(&tenant).await.unwrap();

        let (_, body) =
            json_request(&app.router, Method::POST, "/api/tasks/alpha/run", None).await;
        assert_eq!(body["success"], true);

        let mut finished = None;
        for _ in 0..200 {
            if let Some(record) = app.store.latest("alpha").await.unwrap()
                && record.end_time.is_some()
            {
                finished = Some(record);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished.is_some());

        let (_, body) =
            json_request(&app.router, Method::GET, "/api/tasks/alpha/executions", None).await;
        let executions = body["executions"].as_array().unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0]["status"], "success");
        assert_eq!(executions[0]["detail"], "completed 2 reads");
    }

    #[tokio::test]
    async fn run_now_for_unknown_tenant_is_not_found() {
        let app = test_app(StubTransport::accepting()).await;
        let (status, body) =
            json_request(&app.router, Method::POST, "/api/tasks/ghost/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }
}
