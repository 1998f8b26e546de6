//! Upload orchestration.
//!
//! Whole-file uploads go straight from NEW to COMMITTED. Chunked uploads
//! stage one block per request and become COMMITTED on an explicit commit:
//!
//! ```text
//! NEW --stage--> STAGING --stage--> STAGING --commit--> COMMITTED
//! ```
//!
//! Private variants resolve the access token before any blob is touched,
//! and the object record is written only after the blob operation succeeds.
//! Bodies are streamed into the blob store; only the first piece is looked
//! at, for content sniffing.

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

use crate::{
    models::{
        object::StorageObject,
        payload::{
            ByteStream, CommitChunkRequest, CommitChunkResponse, UploadChunkRequest,
            UploadChunkResponse, UploadRequest, UploadResponse,
        },
    },
    services::{
        blob_gateway::{BlobError, BlobGateway},
        error::{ServiceError, ServiceResult},
        naming::{
            BlobPath, DEFAULT_MIME_TYPE, block_id, chunk_progress, commit_order, display_name,
            download_url, file_ext, new_object_id, new_token, sniff_mime,
        },
        progress::ProgressPublisher,
        repository::{FindObjectBy, ObjectRepository},
        secret_service::SecretService,
    },
};

/// Highest percentage reported while bytes are still arriving. 100 is
/// published once the object is recorded.
const STREAMING_PROGRESS_CAP: f64 = 99.0;

#[derive(Clone)]
pub struct UploadService {
    objects: Arc<dyn ObjectRepository>,
    blobs: Arc<dyn BlobGateway>,
    secrets: SecretService,
    progress: Arc<dyn ProgressPublisher>,
    public_url: String,
    upload_max_mb: u64,
}

impl UploadService {
    pub fn new(
        objects: Arc<dyn ObjectRepository>,
        blobs: Arc<dyn BlobGateway>,
        secrets: SecretService,
        progress: Arc<dyn ProgressPublisher>,
        public_url: impl Into<String>,
        upload_max_mb: u64,
    ) -> Self {
        Self {
            objects,
            blobs,
            secrets,
            progress,
            public_url: public_url.into(),
            upload_max_mb,
        }
    }

    pub async fn upload(
        &self,
        user_id: i64,
        req: UploadRequest<'_>,
    ) -> ServiceResult<UploadResponse> {
        self.upload_into(user_id, "", req).await
    }

    pub async fn upload_with_secret(
        &self,
        user_id: i64,
        access_token: &str,
        req: UploadRequest<'_>,
    ) -> ServiceResult<UploadResponse> {
        let secret = self.secrets.verify_access_token(access_token).await?;
        self.upload_into(user_id, &secret.uuid, req).await
    }

    pub async fn upload_chunk(
        &self,
        user_id: i64,
        req: UploadChunkRequest<'_>,
    ) -> ServiceResult<UploadChunkResponse> {
        self.stage_into(user_id, "", req).await
    }

    pub async fn upload_chunk_with_secret(
        &self,
        user_id: i64,
        access_token: &str,
        req: UploadChunkRequest<'_>,
    ) -> ServiceResult<UploadChunkResponse> {
        let secret = self.secrets.verify_access_token(access_token).await?;
        self.stage_into(user_id, &secret.uuid, req).await
    }

    pub async fn commit_chunk(
        &self,
        user_id: i64,
        req: CommitChunkRequest,
    ) -> ServiceResult<CommitChunkResponse> {
        self.commit_into(user_id, "", req).await
    }

    pub async fn commit_chunk_with_secret(
        &self,
        user_id: i64,
        access_token: &str,
        req: CommitChunkRequest,
    ) -> ServiceResult<CommitChunkResponse> {
        let secret = self.secrets.verify_access_token(access_token).await?;
        self.commit_into(user_id, &secret.uuid, req).await
    }

    async fn upload_into(
        &self,
        user_id: i64,
        secret_id: &str,
        req: UploadRequest<'_>,
    ) -> ServiceResult<UploadResponse> {
        let body = limited(req.body, self.upload_max_bytes());
        let Some((head, body)) = peek(body).await.map_err(|err| self.body_failure(err))? else {
            return Err(ServiceError::invalid("file is empty"));
        };

        let mime_type = sniff_mime(&head);
        let ext = file_ext(&req.original_name);
        let id = new_object_id();
        let token = new_token();
        let path = BlobPath::new(secret_id, &token, &ext);

        let session_id = req.session_id.unwrap_or_default();
        let total = req.total_bytes.filter(|total| *total > 0);
        let progress = self.progress.clone();
        let streaming_session = session_id.clone();
        let on_progress = move |written: u64| {
            if let Some(total) = total {
                let pct = written as f64 / total as f64 * 100.0;
                progress.publish(&streaming_session, pct.min(STREAMING_PROGRESS_CAP));
            }
        };

        let size_bytes = self
            .blobs
            .upload_stream(&path, body, &on_progress)
            .await
            .inspect_err(|err| error!(blob = %path, "blob upload failed: {}", err))
            .map_err(|err| self.blob_failure(err))?;

        let object = StorageObject {
            download_url: download_url(&self.public_url, &id, &token),
            file_name: display_name(req.file_name.as_deref(), &req.original_name),
            id,
            token,
            ext,
            mime_type,
            file_size: size_bytes as i64,
            secret_id: secret_id.to_string(),
            download_password: String::new(),
            pending_block_ids: Vec::new(),
            total_committed_blocks: 0,
            created_by: user_id,
            created_at: Utc::now(),
        };
        self.objects.insert(&object).await?;
        self.progress.publish(&session_id, 100.0);

        info!(
            file_id = %object.id,
            private = object.is_private(),
            size_bytes,
            "file uploaded"
        );
        Ok(upload_response(&object))
    }

    async fn stage_into(
        &self,
        user_id: i64,
        secret_id: &str,
        req: UploadChunkRequest<'_>,
    ) -> ServiceResult<UploadChunkResponse> {
        if req.chunk_index < 0 {
            return Err(ServiceError::invalid("chunk index must not be negative"));
        }
        if req.total_chunks <= 0 {
            return Err(ServiceError::invalid("total chunks must be positive"));
        }
        if req.chunk_index >= req.total_chunks {
            return Err(ServiceError::invalid("chunk index is out of range"));
        }
        let body = limited(req.body, self.upload_max_bytes());
        let Some((head, body)) = peek(body).await.map_err(|err| self.body_failure(err))? else {
            return Err(ServiceError::invalid("chunk is empty"));
        };

        let chunk_id = block_id(req.chunk_index);
        let existing = req
            .file_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let file_id = match existing {
            Some(file_id) => {
                let object = self.owned_object(user_id, secret_id, file_id).await?;
                if object.is_committed() {
                    return Err(ServiceError::invalid("file is already committed"));
                }
                let path = BlobPath::for_object(&object);
                self.blobs
                    .stage_block(&path, &chunk_id, body)
                    .await
                    .inspect_err(|err| error!(blob = %path, "block staging failed: {}", err))
                    .map_err(|err| self.blob_failure(err))?;
                if !self
                    .objects
                    .append_pending_block(&object.id, &chunk_id)
                    .await?
                {
                    return Err(ServiceError::not_found("file not found"));
                }
                object.id
            }
            None => {
                let mime_type = if req.chunk_index == 0 {
                    sniff_mime(&head)
                } else {
                    DEFAULT_MIME_TYPE.to_string()
                };
                let ext = file_ext(&req.original_name);
                let id = new_object_id();
                let token = new_token();
                let path = BlobPath::new(secret_id, &token, &ext);
                self.blobs
                    .stage_block(&path, &chunk_id, body)
                    .await
                    .inspect_err(|err| error!(blob = %path, "block staging failed: {}", err))
                    .map_err(|err| self.blob_failure(err))?;

                let object = StorageObject {
                    download_url: download_url(&self.public_url, &id, &token),
                    file_name: display_name(req.file_name.as_deref(), &req.original_name),
                    id,
                    token,
                    ext,
                    mime_type,
                    file_size: 0,
                    secret_id: secret_id.to_string(),
                    download_password: String::new(),
                    pending_block_ids: vec![chunk_id.clone()],
                    total_committed_blocks: 0,
                    created_by: user_id,
                    created_at: Utc::now(),
                };
                self.objects.insert(&object).await?;
                info!(file_id = %object.id, private = object.is_private(), "chunked upload started");
                object.id
            }
        };

        if let Some(session_id) = req.session_id.as_deref() {
            self.progress.publish(
                session_id,
                chunk_progress(req.chunk_index, req.total_chunks),
            );
        }
        debug!(file_id = %file_id, chunk_index = req.chunk_index, "chunk staged");

        Ok(UploadChunkResponse { chunk_id, file_id })
    }

    async fn commit_into(
        &self,
        user_id: i64,
        secret_id: &str,
        req: CommitChunkRequest,
    ) -> ServiceResult<CommitChunkResponse> {
        let file_id = req.file_id.trim();
        if file_id.is_empty() {
            return Err(ServiceError::invalid("file id is required"));
        }

        let mut object = self.owned_object(user_id, secret_id, file_id).await?;
        if object.pending_block_ids.is_empty() {
            return Err(ServiceError::invalid("no staged blocks"));
        }

        let ordered = commit_order(&object.pending_block_ids);
        let path = BlobPath::for_object(&object);
        self.blobs
            .commit_block_list(&path, &ordered)
            .await
            .inspect_err(|err| error!(blob = %path, "block list commit failed: {}", err))?;
        let committed = self.blobs.committed_size(&path).await?;

        let file_size = committed.size_bytes as i64;
        let block_count = committed.block_count as i64;
        // Staged blocks are kept until the row agrees, so a commit that loses
        // to a concurrent stage can simply be retried.
        if !self
            .objects
            .commit_blocks(&object.id, &object.pending_block_ids, file_size, block_count)
            .await?
        {
            return Err(ServiceError::invalid("staged blocks changed during commit"));
        }
        if let Err(err) = self.blobs.discard_staged(&path).await {
            warn!(blob = %path, "could not discard staged blocks: {}", err);
        }
        object.pending_block_ids.clear();
        object.file_size = file_size;
        object.total_committed_blocks = block_count;

        if let Some(session_id) = req.session_id.as_deref() {
            self.progress.publish(session_id, 100.0);
        }
        info!(
            file_id = %object.id,
            blocks = block_count,
            size_bytes = file_size,
            "chunked upload committed"
        );
        Ok(upload_response(&object))
    }

    /// Load an object the caller may keep writing to: same namespace, same
    /// owner.
    async fn owned_object(
        &self,
        user_id: i64,
        secret_id: &str,
        file_id: &str,
    ) -> ServiceResult<StorageObject> {
        let object = self
            .objects
            .find(&FindObjectBy::id(file_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("file not found"))?;
        if object.secret_id != secret_id || object.created_by != user_id {
            return Err(ServiceError::denied());
        }
        Ok(object)
    }

    fn upload_max_bytes(&self) -> u64 {
        self.upload_max_mb.saturating_mul(1 << 20)
    }

    /// A body over the ceiling reports the configured maximum.
    fn blob_failure(&self, err: BlobError) -> ServiceError {
        match err {
            BlobError::Body(io) if io.kind() == ErrorKind::FileTooLarge => {
                ServiceError::PayloadTooLarge {
                    max_mb: self.upload_max_mb,
                }
            }
            other => other.into(),
        }
    }

    fn body_failure(&self, err: io::Error) -> ServiceError {
        self.blob_failure(BlobError::Body(err))
    }
}

fn upload_response(object: &StorageObject) -> UploadResponse {
    UploadResponse {
        url: object.download_url.clone(),
        file_id: object.id.clone(),
        token: object.token.clone(),
        ext: object.ext.clone(),
        file_name: object.file_name.clone(),
        file_size: object.file_size,
    }
}

/// Fail the stream with `FileTooLarge` once more than `max_bytes` arrived.
fn limited(body: ByteStream<'_>, max_bytes: u64) -> ByteStream<'_> {
    let mut seen: u64 = 0;
    body.map(move |piece| {
        let piece = piece?;
        seen += piece.len() as u64;
        if seen > max_bytes {
            return Err(io::Error::new(
                ErrorKind::FileTooLarge,
                "upload exceeds the size limit",
            ));
        }
        Ok(piece)
    })
    .boxed()
}

/// First non-empty piece of `body`, plus the body with that piece put back.
/// `None` for an empty body.
async fn peek(mut body: ByteStream<'_>) -> io::Result<Option<(Bytes, ByteStream<'_>)>> {
    while let Some(piece) = body.next().await {
        let piece = piece?;
        if piece.is_empty() {
            continue;
        }
        let head = piece.clone();
        let rest = futures::stream::once(async move { Ok(piece) })
            .chain(body)
            .boxed();
        return Ok(Some((head, rest)));
    }
    Ok(None)
}
