use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use pairchat_types::api::{Claims, FriendRequestBody, FriendsResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// The requester is always the authenticated caller.
pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FriendRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let friendship = state
        .coordinator
        .friendships()
        .request(claims.sub, req.recipient_id)
        .await?;

    Ok((StatusCode::CREATED, Json(friendship)))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Path(friendship_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let friendship = state
        .coordinator
        .friendships()
        .accept(friendship_id, claims.sub)
        .await?;

    Ok(Json(friendship))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.coordinator.friendships();
    let (friends, requests) = tokio::try_join!(
        engine.list_friends(claims.sub),
        engine.list_pending_requests(claims.sub),
    )?;

    Ok(Json(FriendsResponse { friends, requests }))
}
