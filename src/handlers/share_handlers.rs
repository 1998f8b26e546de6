//! Share page support and signed blob reads.
//!
//! - GET /share/download/{file_id}?token=   -> what the link holder must present
//! - GET /blobs/{*path}?se=&sig=            -> stream a blob behind a signed link

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::{
    errors::AppError,
    models::{object::StorageObject, payload::FileInfoRequest},
    services::{
        naming::{BlobPath, DEFAULT_MIME_TYPE},
        repository::FindObjectBy,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct FileInfoQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SignedLinkQuery {
    pub se: i64,
    pub sig: String,
}

/// `GET /share/download/{file_id}`
pub async fn file_info(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<FileInfoQuery>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .downloads
        .file_info(FileInfoRequest {
            file_id,
            token: query.token,
        })
        .await?;
    Ok(Json(res))
}

/// `GET /blobs/{*path}`
pub async fn read_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(link): Query<SignedLinkQuery>,
) -> Result<Response, AppError> {
    let path = BlobPath::from_raw(path);
    state.blobs.verify(&path, link.se, &link.sig)?;
    let (file, size) = state.blobs.open(&path).await?;

    // Metadata only refines the headers; the signature already authorized
    // the read.
    let object = state
        .objects
        .find(&FindObjectBy {
            id: None,
            token: Some(path.token().to_string()),
        })
        .await
        .ok()
        .flatten();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), object.as_ref(), size);
    Ok(response)
}

fn set_blob_headers(headers: &mut HeaderMap, object: Option<&StorageObject>, size: u64) {
    let content_type = object
        .map(|o| o.mime_type.as_str())
        .unwrap_or(DEFAULT_MIME_TYPE);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    if let Some(object) = object {
        let name = format!("{}{}", object.file_name, object.ext).replace(['"', '\\'], "_");
        if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{name}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
}
