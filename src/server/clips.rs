//! Clip lookup and download

use super::AppState;
use crate::utils::{AppError, AppResult};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

#[derive(Debug, Serialize, Deserialize)]
pub struct ClipResponse {
    pub folder: String,
    pub file: String,
    /// Where the video bytes are served
    pub src: String,
}

/// GET /clip/{folder}
///
/// Resolves the most recent finished clip in the folder.
pub async fn clip_page(
    State(state): State<AppState>,
    Path(folder): Path<String>,
) -> AppResult<Json<ClipResponse>> {
    let clip = state
        .store
        .latest_clip(&folder)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no clip in {folder}")))?;

    Ok(Json(ClipResponse {
        src: clip.file_link(),
        folder: clip.folder,
        file: clip.file,
    }))
}

/// GET /clip_file/{folder}/{file}
pub async fn clip_file(
    State(state): State<AppState>,
    Path((folder, file)): Path<(String, String)>,
) -> AppResult<Response> {
    let path = state
        .store
        .clip_path(&folder, &file)
        .await
        .ok_or_else(|| AppError::NotFound(format!("{folder}/{file}")))?;

    let handle = tokio::fs::File::open(&path).await?;
    let len = handle.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(handle));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        body,
    )
        .into_response())
}
