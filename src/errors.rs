use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{
    blob_gateway::BlobError,
    error::{ServiceError, UpstreamError},
};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Upstream(upstream) => {
                tracing::error!("upstream failure: {}", upstream);
                match upstream {
                    UpstreamError::Database(_) | UpstreamError::Blob(_) => StatusCode::BAD_GATEWAY,
                    UpstreamError::Hash(_) | UpstreamError::Join(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            }
        };
        AppError::new(status, err.to_string())
    }
}

/// Failures of signed blob reads.
impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        let status = match &err {
            BlobError::InvalidPath | BlobError::InvalidBlockList(_) | BlobError::Body(_) => {
                StatusCode::BAD_REQUEST
            }
            BlobError::InvalidSignature | BlobError::Expired => StatusCode::FORBIDDEN,
            BlobError::NotFound(_) => StatusCode::NOT_FOUND,
            BlobError::Io(_) | BlobError::Manifest(_) | BlobError::LinkValidity => {
                tracing::error!("blob read failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}
