//! HTTP handlers. They bind requests into plain payload structs, call the
//! services and map `ServiceError` to status codes through `AppError`.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::errors::AppError;

pub mod health_handlers;
pub mod progress_handlers;
pub mod secret_handlers;
pub mod share_handlers;
pub mod storage_handlers;

/// Header carrying the calling user's numeric id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// User assumed when no identity header is present.
pub const DEFAULT_USER_ID: i64 = 1;

/// Calling user, read from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub i64);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Caller(DEFAULT_USER_ID));
        };
        value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(Caller)
            .ok_or_else(|| AppError::bad_request(format!("invalid {USER_ID_HEADER} header")))
    }
}
