//! Recording and notification endpoints

use super::AppState;
use crate::recorder::RecordingRequest;
use crate::session::{check_notification as poll_notification, NotificationStatus};
use crate::storage::ClipStore;
use crate::utils::{AppError, AppResult};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    /// Seconds; negative values record nothing
    pub duration: i64,
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRecordingResponse {
    pub status: String,
    pub folder: String,
}

#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingsResponse {
    pub recordings: Vec<String>,
}

fn require_client_id(client_id: &str) -> AppResult<()> {
    if client_id.trim().is_empty() {
        return Err(AppError::BadRequest("client_id is required".to_string()));
    }
    Ok(())
}

/// POST /start-recording
///
/// Returns as soon as the recording task is spawned.
pub async fn start_recording(
    State(state): State<AppState>,
    Json(request): Json<StartRecordingRequest>,
) -> AppResult<Json<StartRecordingResponse>> {
    require_client_id(&request.client_id)?;

    if request.duration > state.config.max_duration_secs {
        return Err(AppError::BadRequest(format!(
            "duration may not exceed {} seconds",
            state.config.max_duration_secs
        )));
    }
    if state.shutdown.is_cancelled() {
        return Err(AppError::Unavailable("server is shutting down".to_string()));
    }

    let folder = ClipStore::generate_folder_name();
    state.sessions.get_or_create(&request.client_id);
    state.recorder.spawn(RecordingRequest::new(
        request.client_id,
        folder.clone(),
        request.duration,
    ));

    Ok(Json(StartRecordingResponse {
        status: "Recording started".to_string(),
        folder,
    }))
}

/// POST /check-notification
///
/// Drains the client's pending notification.
pub async fn check_notification(
    State(state): State<AppState>,
    Json(request): Json<ClientRequest>,
) -> Json<NotificationStatus> {
    Json(poll_notification(&state.sessions, &request.client_id))
}

/// POST /my-recordings
pub async fn my_recordings(
    State(state): State<AppState>,
    Json(request): Json<ClientRequest>,
) -> Json<RecordingsResponse> {
    let recordings = state
        .sessions
        .list_recordings(&request.client_id)
        .iter()
        .map(|clip| clip.link())
        .collect();
    Json(RecordingsResponse { recordings })
}
