//! HTTP mapping for [`ServiceError`].

use crate::error::ServiceError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ServiceError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput { .. } | ServiceError::InvalidQuality { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::PayloadTooLarge { .. } | ServiceError::ResourceExhausted { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::CorruptDocument { .. } | ServiceError::UnsupportedDocument { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Overloaded { .. }
            | ServiceError::ConversionTimeout { .. }
            | ServiceError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Expired { .. } => StatusCode::GONE,
            ServiceError::Rasterizer(_)
            | ServiceError::Storage(_)
            | ServiceError::InvalidConfig(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {}", self);
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        match self {
            ServiceError::Overloaded {
                retry_after_secs, ..
            } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
