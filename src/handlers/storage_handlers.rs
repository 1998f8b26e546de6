//! Upload, commit and download endpoints under `/api/v1/storage`.
//!
//! Uploads arrive as multipart forms and the file part is streamed to the
//! blob store as it is read, so text fields (`file_name`, `file_id`,
//! `chunk_index`, `total_chunks`) must precede it. Fields after the file
//! part are ignored. The optional `id` query parameter is the progress
//! session to notify, `secret` the access token of a private namespace.

use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
};

use crate::{
    errors::AppError,
    handlers::Caller,
    models::payload::{
        ByteStream, CommitChunkRequest, DownloadRequest, RequestDownloadRequest,
        UploadChunkRequest, UploadRequest,
    },
    services::error::ServiceError,
    state::AppState,
};

const FILE_FIELD: &str = "file";
const CHUNK_FIELD: &str = "chunk";

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Progress session id.
    pub id: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub token: String,
    pub secret: Option<String>,
    pub password: Option<String>,
    pub silent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestDownloadQuery {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub secret: String,
}

/// Text fields seen before the file part, and the announced request size.
#[derive(Debug, Default)]
struct FormHead {
    fields: HashMap<String, String>,
    total_bytes: Option<u64>,
}

impl FormHead {
    fn new(headers: &HeaderMap) -> Self {
        let total_bytes = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        Self {
            fields: HashMap::new(),
            total_bytes,
        }
    }

    async fn push_text(&mut self, field: Field<'_>, max_mb: u64) -> Result<(), AppError> {
        let name = field.name().unwrap_or_default().to_string();
        let value = field
            .text()
            .await
            .map_err(|err| multipart_error(err, max_mb))?;
        self.fields.insert(name, value);
        Ok(())
    }

    /// Non-empty text field.
    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn int(&self, name: &str) -> Result<i64, AppError> {
        self.text(name)
            .ok_or_else(|| AppError::bad_request(format!("`{name}` is required")))?
            .parse::<i64>()
            .map_err(|_| AppError::bad_request(format!("`{name}` must be an integer")))
    }

    fn into_upload(self, session_id: Option<String>, file: Field<'_>) -> UploadRequest<'_> {
        UploadRequest {
            session_id,
            file_name: self.text("file_name"),
            original_name: file.file_name().unwrap_or_default().to_string(),
            total_bytes: self.total_bytes,
            body: field_body(file),
        }
    }

    fn into_chunk(
        self,
        session_id: Option<String>,
        chunk: Field<'_>,
    ) -> Result<UploadChunkRequest<'_>, AppError> {
        Ok(UploadChunkRequest {
            session_id,
            file_id: self.text("file_id"),
            file_name: self.text("file_name"),
            chunk_index: self.int("chunk_index")?,
            total_chunks: self.int("total_chunks")?,
            original_name: chunk.file_name().unwrap_or_default().to_string(),
            body: field_body(chunk),
        })
    }
}

fn missing_part(name: &str) -> AppError {
    AppError::bad_request(format!("`{name}` is required"))
}

async fn next_field(
    multipart: &mut Multipart,
    max_mb: u64,
) -> Result<Option<Field<'_>>, AppError> {
    multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, max_mb))
}

/// The file part as a byte stream. A body over the route limit surfaces
/// as `FileTooLarge`.
fn field_body(field: Field<'_>) -> ByteStream<'_> {
    field
        .map(|piece| {
            piece.map_err(|err| {
                let kind = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ErrorKind::FileTooLarge
                } else {
                    ErrorKind::InvalidData
                };
                io::Error::new(kind, err.body_text())
            })
        })
        .boxed()
}

/// A body over the configured limit surfaces as a 413 from the multipart
/// reader.
fn multipart_error(err: MultipartError, max_mb: u64) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge { max_mb }.into()
    } else {
        AppError::bad_request(err.body_text())
    }
}

fn secret_of(query: &UploadQuery) -> &str {
    query.secret.as_deref().unwrap_or_default()
}

/// `POST /api/v1/storage/upload`
pub async fn upload(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max_mb = state.config.upload_max_size_mb;
    let mut head = FormHead::new(&headers);
    while let Some(field) = next_field(&mut multipart, max_mb).await? {
        if field.name() != Some(FILE_FIELD) {
            head.push_text(field, max_mb).await?;
            continue;
        }
        let res = state
            .uploads
            .upload(user_id, head.into_upload(query.id, field))
            .await?;
        return Ok((StatusCode::CREATED, Json(res)));
    }
    Err(missing_part(FILE_FIELD))
}

/// `POST /api/v1/storage/secret/upload`
pub async fn upload_with_secret(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max_mb = state.config.upload_max_size_mb;
    let secret = secret_of(&query).to_string();
    let mut head = FormHead::new(&headers);
    while let Some(field) = next_field(&mut multipart, max_mb).await? {
        if field.name() != Some(FILE_FIELD) {
            head.push_text(field, max_mb).await?;
            continue;
        }
        let res = state
            .uploads
            .upload_with_secret(user_id, &secret, head.into_upload(query.id, field))
            .await?;
        return Ok((StatusCode::CREATED, Json(res)));
    }
    Err(missing_part(FILE_FIELD))
}

/// `POST /api/v1/storage/upload/stage`
pub async fn upload_chunk(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max_mb = state.config.upload_max_size_mb;
    let mut head = FormHead::new(&headers);
    while let Some(field) = next_field(&mut multipart, max_mb).await? {
        if field.name() != Some(CHUNK_FIELD) {
            head.push_text(field, max_mb).await?;
            continue;
        }
        let req = head.into_chunk(query.id, field)?;
        let res = state.uploads.upload_chunk(user_id, req).await?;
        return Ok((StatusCode::CREATED, Json(res)));
    }
    Err(missing_part(CHUNK_FIELD))
}

/// `POST /api/v1/storage/secret/upload/stage`
pub async fn upload_chunk_with_secret(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max_mb = state.config.upload_max_size_mb;
    let secret = secret_of(&query).to_string();
    let mut head = FormHead::new(&headers);
    while let Some(field) = next_field(&mut multipart, max_mb).await? {
        if field.name() != Some(CHUNK_FIELD) {
            head.push_text(field, max_mb).await?;
            continue;
        }
        let req = head.into_chunk(query.id, field)?;
        let res = state
            .uploads
            .upload_chunk_with_secret(user_id, &secret, req)
            .await?;
        return Ok((StatusCode::CREATED, Json(res)));
    }
    Err(missing_part(CHUNK_FIELD))
}

/// `POST /api/v1/storage/upload/commit`
pub async fn commit_chunk(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<UploadQuery>,
    Json(mut req): Json<CommitChunkRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.session_id = query.id;
    let res = state.uploads.commit_chunk(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// `POST /api/v1/storage/secret/upload/commit`
pub async fn commit_chunk_with_secret(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<UploadQuery>,
    Json(mut req): Json<CommitChunkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let secret = secret_of(&query).to_string();
    req.session_id = query.id;
    let res = state
        .uploads
        .commit_chunk_with_secret(user_id, &secret, req)
        .await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// `GET /api/v1/storage/download/{file_id}`
///
/// Redirects to the signed blob link, or returns it as JSON with
/// `silent=true`.
pub async fn download(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(file_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let silent = query.silent.as_deref() == Some("true");
    let res = state
        .downloads
        .download(
            user_id,
            DownloadRequest {
                file_id,
                token: query.token,
                secret: query.secret,
                download_password: query.password,
            },
        )
        .await?;

    if silent {
        Ok(Json(res).into_response())
    } else {
        Ok(Redirect::temporary(&res.url).into_response())
    }
}

/// `GET /api/v1/storage/download/request/{file_id}`
pub async fn request_download(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(file_id): Path<String>,
    Query(query): Query<RequestDownloadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .downloads
        .request_download(
            user_id,
            RequestDownloadRequest {
                file_id,
                token: query.token,
                secret: query.secret,
            },
        )
        .await?;
    Ok(Json(res))
}
