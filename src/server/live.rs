//! Live preview endpoint

use super::AppState;
use crate::capture::FrameSource;
use crate::stream::{content_type, live_stream};
use crate::utils::AppResult;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};

/// GET /video_feed
///
/// Competes for the camera like any recording. Under the exclusive policy a
/// busy camera is reported as 409 rather than opened a second time.
pub async fn video_feed(State(state): State<AppState>) -> AppResult<Response> {
    let lease = state.arbiter.acquire(state.config.acquire_timeout()).await?;

    let mut source = FrameSource::new(lease);
    if let Some(fps) = state.config.preview_fps {
        source = source.with_max_fps(fps);
    }

    tracing::info!("Live preview started");
    let stream = live_stream(source, state.config.jpeg_quality, state.shutdown.child_token());

    let mime = HeaderValue::from_str(&content_type())
        .unwrap_or_else(|_| HeaderValue::from_static("multipart/x-mixed-replace"));

    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store")),
            (header::HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
