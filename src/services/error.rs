use thiserror::Error;

use crate::services::blob_gateway::BlobError;

/// Every failure a gateway operation can report to its caller.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("file size too large (max: {max_mb}MB)")]
    PayloadTooLarge { max_mb: u64 },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Failures of the blob store or the metadata store, passed through as-is.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("metadata store: {0}")]
    Database(#[from] sqlx::Error),
    #[error("blob store: {0}")]
    Blob(#[from] BlobError),
    #[error("password hashing: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("background task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn denied() -> Self {
        Self::PermissionDenied("permission denied".into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Upstream(UpstreamError::Database(err))
    }
}

impl From<BlobError> for ServiceError {
    fn from(err: BlobError) -> Self {
        match err {
            // The caller named blocks that were never staged.
            BlobError::InvalidBlockList(msg) => Self::InvalidArgument(msg),
            BlobError::Body(err) => Self::InvalidArgument(format!("could not read upload: {err}")),
            other => Self::Upstream(UpstreamError::Blob(other)),
        }
    }
}

impl From<bcrypt::BcryptError> for ServiceError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::Upstream(UpstreamError::Hash(err))
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Upstream(UpstreamError::Join(err))
    }
}
