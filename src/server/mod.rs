//! HTTP server
//!
//! Routes:
//! - GET  /video_feed                  - live MJPEG preview
//! - POST /start-recording             - spawn a timed recording
//! - POST /check-notification          - poll for a finished recording
//! - POST /my-recordings               - list a client's clips
//! - GET  /clip/{folder}               - newest clip in a folder
//! - GET  /clip_file/{folder}/{file}   - raw video bytes
//! - GET  /health                      - liveness and device status

pub mod clips;
pub mod health;
pub mod live;
pub mod recording;

use crate::capture::{CameraBackend, CaptureArbiter};
use crate::config::Config;
use crate::recorder::{EncoderFactory, Recorder};
use crate::session::SessionRegistry;
use crate::storage::ClipStore;
use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state, created once per server
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub arbiter: CaptureArbiter,
    pub sessions: Arc<SessionRegistry>,
    pub store: ClipStore,
    pub recorder: Recorder,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Config,
        backend: Arc<dyn CameraBackend>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Self {
        let arbiter = CaptureArbiter::new(backend, config.arbiter_config());
        let sessions = Arc::new(SessionRegistry::new(config.history_limit));
        let store = ClipStore::new(config.clip_dir.clone());
        let shutdown = CancellationToken::new();
        let recorder = Recorder::new(
            arbiter.clone(),
            store.clone(),
            encoders,
            Arc::clone(&sessions),
            config.acquire_timeout(),
            shutdown.clone(),
        );

        Self {
            config: Arc::new(config),
            arbiter,
            sessions,
            store,
            recorder,
            shutdown,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/video_feed", get(live::video_feed))
        .route("/start-recording", post(recording::start_recording))
        .route("/check-notification", post(recording::check_notification))
        .route("/my-recordings", post(recording::my_recordings))
        .route("/clip/{folder}", get(clips::clip_page))
        .route("/clip_file/{folder}/{file}", get(clips::clip_file))
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server until Ctrl+C or SIGTERM
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let backend = config.camera_backend();
    let encoders = Arc::new(config.encoder_factory());
    let bind = config.bind;

    let state = AppState::new(config, backend, encoders);
    state
        .store
        .init()
        .await
        .with_context(|| format!("failed to create clip directory {:?}", state.store.root()))?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind HTTP address {bind}"))?;
    info!("HTTP server listening on {}", bind);

    let token = state.shutdown.clone();
    let graceful = async move {
        tokio::select! {
            () = shutdown_signal() => {}
            () = token.cancelled() => {}
        }
        // Ends live previews so open connections can drain
        token.cancel();
    };

    if let Err(e) = axum::serve(listener, create_router(state.clone()))
        .with_graceful_shutdown(graceful)
        .await
    {
        error!("HTTP server error: {}", e);
    }

    state.recorder.shutdown().await;
    info!("HTTP server shut down gracefully");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DevicePolicy, SyntheticBackend};
    use crate::recorder::encoder::test_support::RawFileEncoderFactory;
    use crate::session::NotificationStatus;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(policy: DevicePolicy) -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            clip_dir: dir.path().to_path_buf(),
            camera: "synthetic".to_string(),
            width: 16,
            height: 8,
            fps: 50,
            device_policy: policy,
            acquire_timeout_ms: 1000,
            ..Config::default()
        };
        let state = AppState::new(
            config,
            Arc::new(SyntheticBackend::new()),
            Arc::new(RawFileEncoderFactory),
        );
        (dir, state)
    }

    async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = create_router(state.clone())
            .oneshot(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn get(state: &AppState, uri: &str) -> axum::response::Response {
        create_router(state.clone())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn poll(state: &AppState, client_id: &str) -> NotificationStatus {
        let (status, body) =
            post_json(state, "/check-notification", json!({ "client_id": client_id })).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_record_then_poll_scenario() {
        let (_dir, state) = test_state(DevicePolicy::Shared);

        let started = Instant::now();
        let (status, body) = post_json(
            &state,
            "/start-recording",
            json!({ "duration": 2, "client_id": "web-1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Recording started");
        let folder = body["folder"].as_str().unwrap().to_string();
        assert!(started.elapsed() < Duration::from_millis(500));

        let link = loop {
            match poll(&state, "web-1").await {
                NotificationStatus::Pending => {
                    assert!(started.elapsed() < Duration::from_secs(5), "recording never finished");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                NotificationStatus::Done { link } => break link,
                other => panic!("unexpected status {other:?}"),
            }
        };
        assert_eq!(link, format!("/clip/{folder}"));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(poll(&state, "web-1").await, NotificationStatus::Pending);

        let (_, listed) =
            post_json(&state, "/my-recordings", json!({ "client_id": "web-1" })).await;
        assert_eq!(listed["recordings"], json!([link]));

        let page = get(&state, &link).await;
        assert_eq!(page.status(), StatusCode::OK);
        let bytes = page.into_body().collect().await.unwrap().to_bytes();
        let clip: Value = serde_json::from_slice(&bytes).unwrap();
        let src = clip["src"].as_str().unwrap().to_string();

        let file = get(&state, &src).await;
        assert_eq!(file.status(), StatusCode::OK);
        assert_eq!(file.headers()[header::CONTENT_TYPE], "video/mp4");
        let bytes = file.into_body().collect().await.unwrap().to_bytes();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_client_is_pending_and_empty() {
        let (_dir, state) = test_state(DevicePolicy::Shared);
        assert_eq!(poll(&state, "stranger").await, NotificationStatus::Pending);

        let (status, body) =
            post_json(&state, "/my-recordings", json!({ "client_id": "stranger" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "recordings": [] }));
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_clips_are_not_found() {
        let (dir, state) = test_state(DevicePolicy::Shared);
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        assert_eq!(get(&state, "/clip/absent").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&state, "/clip/empty").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            get(&state, "/clip_file/absent/x.mp4").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(&state, "/clip_file/..%2F/x.mp4").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_start_recording_validates_input() {
        let (_dir, state) = test_state(DevicePolicy::Shared);

        let (status, body) =
            post_json(&state, "/start-recording", json!({ "duration": 1, "client_id": "" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let (status, _) = post_json(
            &state,
            "/start-recording",
            json!({ "duration": 100000, "client_id": "c" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_video_feed_streams_jpeg_parts() {
        let (_dir, state) = test_state(DevicePolicy::Shared);

        let response = get(&state, "/video_feed").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let chunk = frame.into_data().unwrap();
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
        assert_eq!(state.arbiter.active_leases(), 1);

        // Client disconnect
        drop(body);
        assert_eq!(state.arbiter.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_exclusive_device_rejects_competing_capture() {
        let (_dir, state) = test_state(DevicePolicy::Exclusive);

        let preview = get(&state, "/video_feed").await;
        assert_eq!(preview.status(), StatusCode::OK);

        let second = get(&state, "/video_feed").await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let bytes = second.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "DEVICE_BUSY");

        let (status, _) = post_json(
            &state,
            "/start-recording",
            json!({ "duration": 1, "client_id": "blocked" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let started = Instant::now();
        let outcome = loop {
            match poll(&state, "blocked").await {
                NotificationStatus::Pending => {
                    assert!(started.elapsed() < Duration::from_secs(3));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                other => break other,
            }
        };
        assert!(matches!(outcome, NotificationStatus::Error { .. }));
        drop(preview);
    }

    #[tokio::test]
    async fn test_health_reports_device_state() {
        let (_dir, state) = test_state(DevicePolicy::Shared);
        let response = get(&state, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["devicePolicy"], "shared");
        assert_eq!(body["capturing"], false);
        assert_eq!(body["recordings"], json!([]));

        let (_, started) = post_json(
            &state,
            "/start-recording",
            json!({ "duration": 5, "client_id": "watcher" }),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let response = get(&state, "/health").await;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["capturing"], true);
        assert_eq!(body["recordingsInFlight"], 1);
        assert_eq!(
            body["recordings"],
            json!([{ "folder": started["folder"], "state": "recording" }])
        );
        state.recorder.shutdown().await;
    }
}
