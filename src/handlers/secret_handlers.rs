//! Secret endpoints under `/api/v1/storage/secret`.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::{
    errors::AppError,
    handlers::Caller,
    models::payload::{CreateSecretRequest, ResetPinCodeRequest, RetrieveSecretRequest},
    state::AppState,
};

/// `POST /api/v1/storage/secret`
pub async fn create_secret(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(req): Json<CreateSecretRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.secrets.create_secret(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// `PUT /api/v1/storage/secret/retrieve`
///
/// Rotates the access token; the previous one stops working.
pub async fn retrieve_secret(
    State(state): State<AppState>,
    Json(req): Json<RetrieveSecretRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.secrets.retrieve_secret(req).await?;
    Ok(Json(res))
}

/// `PUT /api/v1/storage/secret/pin`
pub async fn reset_pin_code(
    State(state): State<AppState>,
    Json(req): Json<ResetPinCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.secrets.reset_pin_code(req).await?;
    Ok(Json(res))
}
