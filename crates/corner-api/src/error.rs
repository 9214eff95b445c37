//! REST error taxonomy with structured responses.
//!
//! Only the request/response surface reports failures explicitly; the
//! WebSocket channel drops them silently. Keep the two in sync with the
//! `DeliveryError` mapping below.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use corner_gateway::delivery::DeliveryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            _ => {
                debug!(error_code = code, message = %message, "Client error");
            }
        }

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::NotFound => ApiError::NotFound("Conversation not found".into()),
            DeliveryError::Forbidden => {
                ApiError::Forbidden("No active subscription with this coach".into())
            }
            DeliveryError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_taxonomy() {
        assert_eq!(ApiError::Unauthorized("".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Validation("".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Internal("".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn delivery_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            ApiError::from(DeliveryError::NotFound),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(DeliveryError::Forbidden),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            ApiError::from(DeliveryError::Store(anyhow::anyhow!("disk on fire"))),
            ApiError::Internal(_)
        ));
    }
}
