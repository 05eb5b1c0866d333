//! Mapping of domain errors to HTTP responses.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::error;

use fateticket_core::{GenerationError, ServiceError};

/// Failure body: a single user-facing message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn generation_error(err: GenerationError) -> ApiError {
    let status = match &err {
        GenerationError::InvalidRequest(_) | GenerationError::NoValidWeight => {
            StatusCode::BAD_REQUEST
        }
        GenerationError::NotFound(_) => StatusCode::NOT_FOUND,
        GenerationError::Store { .. } => {
            error!(error = %err, "Fate batch generation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, err.user_message())
}

pub fn service_error(err: ServiceError) -> ApiError {
    let status = match &err {
        ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) | ServiceError::SoldOut(_) => StatusCode::NOT_FOUND,
        ServiceError::Store(e) => {
            error!(error = %e, "Fate ticket operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, err.user_message())
}
