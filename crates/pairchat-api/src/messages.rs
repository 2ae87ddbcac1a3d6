use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use pairchat_types::api::{Claims, SendMessageRequest};

use crate::auth::AppState;
use crate::error::ApiError;

/// Full history with `peer_id`. Only readable by one of the two friends.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .coordinator
        .conversation_history(claims.sub, peer_id)
        .await?;

    Ok(Json(messages))
}

/// Same path as the gateway's `SendMessage`: stored, then pushed to every
/// connection that has the conversation open.
pub async fn send_message(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .coordinator
        .send_message(claims.sub, peer_id, req.content)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
