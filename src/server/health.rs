//! Health check endpoint

use super::AppState;
use crate::capture::DevicePolicy;
use crate::recorder::RecordingState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub device_policy: DevicePolicy,
    pub capturing: bool,
    pub active_leases: usize,
    pub recordings_in_flight: usize,
    pub recordings: Vec<ActiveRecording>,
    pub sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveRecording {
    pub folder: String,
    pub state: RecordingState,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        device_policy: state.arbiter.policy(),
        capturing: state.arbiter.is_capturing(),
        active_leases: state.arbiter.active_leases(),
        recordings_in_flight: state.recorder.in_flight(),
        recordings: state
            .recorder
            .phases()
            .into_iter()
            .map(|(folder, state)| ActiveRecording { folder, state })
            .collect(),
        sessions: state.sessions.session_count(),
    })
}
