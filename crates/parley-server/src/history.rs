use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::error;

use parley_hub::AppState;
use parley_types::models::Message;

/// Direct-message history between two names, either direction, oldest
/// first. Clients treat a failure here as an empty session; it never
/// blocks login.
pub async fn direct_history(
    State(state): State<AppState>,
    Path((a, b)): Path<(String, String)>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    // Run the blocking query off the async runtime
    let db = state.db.clone();
    let messages = tokio::task::spawn_blocking(move || db.direct_history(&a, &b))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("direct history query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}

/// Room history, oldest first.
pub async fn room_history(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let db = state.db.clone();
    let messages = tokio::task::spawn_blocking(move || db.room_history(&room))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("room history query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}
