use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

use super::error::{Result as WebResult, WebError};
use crate::state::AppState;

#[derive(Serialize, Debug)]
pub struct RoomsResponse {
    pub room_ids: Vec<String>,
}

pub async fn list_rooms_handler(State(app_state): State<AppState>) -> WebResult<Json<RoomsResponse>> {
    let room_ids = app_state.registry.list_rooms().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list rooms");
        WebError::ServiceUnavailable(e)
    })?;
    tracing::debug!(rooms.count = room_ids.len(), "HTTP: Listed rooms");
    Ok(Json(RoomsResponse { room_ids }))
}

pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}
