use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use pairchat_core::ChatError;
use pairchat_types::api::ErrorBody;

/// HTTP face of a rejected core operation.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ChatError::InvalidPair | ChatError::EmptyContent | ChatError::ContentTooLong => {
                StatusCode::BAD_REQUEST
            }
            ChatError::NotAuthorized | ChatError::NotFriends => StatusCode::FORBIDDEN,
            ChatError::NotFound | ChatError::UnknownUser => StatusCode::NOT_FOUND,
            ChatError::DuplicateRequest | ChatError::AlreadyAccepted => StatusCode::CONFLICT,
            ChatError::ConnectionClosed => StatusCode::GONE,
            ChatError::PersistenceFailed(_) | ChatError::LookupFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Store failures are logged here and kept out of the response body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {:#}", self.0);
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError(ChatError::NotFriends).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError(ChatError::DuplicateRequest).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError(ChatError::EmptyContent).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(ChatError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(ChatError::LookupFailed(anyhow::anyhow!("timeout"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_errors_are_not_leaked() {
        let response = ApiError(ChatError::PersistenceFailed(anyhow::anyhow!("disk /var/db full")))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
