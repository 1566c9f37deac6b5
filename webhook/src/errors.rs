use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use directory::{DirectoryError, TokenError};
use serde::Serialize;
use thiserror::Error;

/// Errors that can surface to the notifying system.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("too many requests")]
    TooManyRequests,

    #[error("entity store failure while reconciling {entity_id}: {source}")]
    Remote {
        entity_id: String,
        source: DirectoryError,
    },
}

impl From<TokenError> for WebhookError {
    fn from(err: TokenError) -> Self {
        WebhookError::BadRequest(err.to_string())
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebhookError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            // An expired relayed token surfaces mid-pass as a remote
            // Unauthorized; report it as 401 rather than a store fault.
            WebhookError::Remote {
                source: DirectoryError::Unauthorized,
                ..
            } => StatusCode::UNAUTHORIZED,
            WebhookError::Remote { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                WebhookError::BadRequest("no entity id".into()),
                StatusCode::BAD_REQUEST,
            ),
            (WebhookError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                WebhookError::TooManyRequests,
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                WebhookError::Remote {
                    entity_id: "p1".into(),
                    source: DirectoryError::Unauthorized,
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                WebhookError::Remote {
                    entity_id: "p1".into(),
                    source: DirectoryError::RemoteError(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "http://store/v1/entities/p1".into(),
                    ),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_token_error_converts_to_bad_request() {
        let err: WebhookError = TokenError::MalformedPayload.into();
        assert!(matches!(err, WebhookError::BadRequest(_)));
    }
}
