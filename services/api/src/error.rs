use crate::auth::AuthError;
use crate::inference::InferenceError;
use crate::upload::UploadRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Failures surfaced by the relay handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadRejection),

    #[error("Ingredients are required")]
    IngredientsRequired,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Access to this object is not allowed")]
    Forbidden,

    #[error("Image not found")]
    NotFound,

    #[error("Failed to upload image")]
    StorageFailed,

    #[error("Failed to delete image")]
    DeleteFailed,

    #[error("Failed to detect ingredients")]
    DetectionFailed(#[source] InferenceError),

    #[error("Failed to generate recipe")]
    GenerationFailed(#[source] InferenceError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Upload(_) | ApiError::IngredientsRequired | ApiError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Auth(AuthError::VerificationUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::StorageFailed
            | ApiError::DeleteFailed
            | ApiError::DetectionFailed(_)
            | ApiError::GenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Upload(rejection) => rejection.code(),
            ApiError::IngredientsRequired => "INGREDIENTS_REQUIRED",
            ApiError::InvalidBody(_) => "INVALID_BODY",
            ApiError::Auth(AuthError::VerificationUnavailable) => "AUTH_UNAVAILABLE",
            ApiError::Auth(_) => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::StorageFailed => "STORAGE_ERROR",
            ApiError::DeleteFailed => "STORAGE_ERROR",
            ApiError::DetectionFailed(_) => "DETECTION_ERROR",
            ApiError::GenerationFailed(_) => "GENERATION_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            ApiError::DetectionFailed(source) | ApiError::GenerationFailed(source) => {
                error!(error = %source, code = self.code(), "{}", self)
            }
            _ if status.is_server_error() => error!(code = self.code(), "{}", self),
            _ => warn!(code = self.code(), "{}", self),
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}
