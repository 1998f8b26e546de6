//! Plain request/response structs exchanged between handlers and services.
//!
//! Nothing in here references axum: the HTTP layer binds these from
//! multipart forms, query strings and JSON bodies, and the services only
//! ever see the plain values.

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use std::io;

/// Upload body as it arrives. Borrowed from the request it is read from.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Body made of a single in-memory piece.
pub fn body_from(data: Bytes) -> ByteStream<'static> {
    futures::stream::once(async move { Ok(data) }).boxed()
}

/// Whole-file upload.
pub struct UploadRequest<'a> {
    /// Progress session to notify, if any.
    pub session_id: Option<String>,
    /// Display name override (`file_name` form field).
    pub file_name: Option<String>,
    /// File name as sent by the client; the extension is taken from it.
    pub original_name: String,
    /// Expected body length, when the client announced one. Progress is
    /// measured against it.
    pub total_bytes: Option<u64>,
    pub body: ByteStream<'a>,
}

/// One chunk of a multi-request upload.
pub struct UploadChunkRequest<'a> {
    pub session_id: Option<String>,
    /// Absent on the first chunk; the server mints the object then.
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub original_name: String,
    /// 0-based position of this chunk.
    pub chunk_index: i64,
    /// Declared number of chunks, used for progress only.
    pub total_chunks: i64,
    pub body: ByteStream<'a>,
}

/// Finalize every staged chunk of an object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitChunkRequest {
    #[serde(skip)]
    pub session_id: Option<String>,
    pub file_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub file_id: String,
    pub token: String,
    pub secret: Option<String>,
    pub download_password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestDownloadRequest {
    pub file_id: String,
    pub token: String,
    pub secret: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileInfoRequest {
    pub file_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSecretRequest {
    pub username: String,
    pub password: String,
    pub pin_code: String,
    #[serde(default)]
    pub master_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrieveSecretRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetPinCodeRequest {
    pub access_token: String,
    pub new_pin_code: String,
}

/// Returned by whole-file uploads and by chunk commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub url: String,
    pub file_id: String,
    pub token: String,
    pub ext: String,
    pub file_name: String,
    pub file_size: i64,
}

pub type CommitChunkResponse = UploadResponse;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadChunkResponse {
    pub chunk_id: String,
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestDownloadResponse {
    /// Share page link. Carries id and token, never the password.
    pub url: String,
    pub password: String,
    pub file_name: String,
}

/// Returned by secret creation and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretResponse {
    pub user_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResetPinCodeResponse {
    pub updated: bool,
}

/// What a share-link holder may learn before presenting credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileInfoResponse {
    pub file_id: String,
    pub file_name: String,
    pub ext: String,
    pub mime_type: String,
    pub file_size: i64,
    pub has_secret: bool,
    pub password_required: bool,
}
