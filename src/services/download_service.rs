//! Download authorization.
//!
//! Every read starts from a joint `(id, token)` lookup. Access to a
//! private object needs either the owning secret's access token or, once
//! the owner has requested one, the object's download password. A set
//! password is always required.

use chrono::Duration;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::{
    models::{
        object::StorageObject,
        payload::{
            DownloadRequest, DownloadResponse, FileInfoRequest, FileInfoResponse,
            RequestDownloadRequest, RequestDownloadResponse,
        },
    },
    services::{
        blob_gateway::BlobGateway,
        error::{ServiceError, ServiceResult},
        naming::{BlobPath, new_download_password, share_url},
        repository::{FindObjectBy, ObjectRepository},
        secret_service::SecretService,
    },
};

#[derive(Clone)]
pub struct DownloadService {
    objects: Arc<dyn ObjectRepository>,
    blobs: Arc<dyn BlobGateway>,
    secrets: SecretService,
    public_url: String,
    link_validity: Duration,
}

impl DownloadService {
    pub fn new(
        objects: Arc<dyn ObjectRepository>,
        blobs: Arc<dyn BlobGateway>,
        secrets: SecretService,
        public_url: impl Into<String>,
        link_validity: Duration,
    ) -> Self {
        Self {
            objects,
            blobs,
            secrets,
            public_url: public_url.into(),
            link_validity,
        }
    }

    pub async fn download(&self, user_id: i64, req: DownloadRequest) -> ServiceResult<DownloadResponse> {
        let object = self.find_object(&req.file_id, &req.token).await?;

        match non_empty(req.secret.as_deref()) {
            Some(access_token) => {
                let secret = self.secrets.verify_access_token(access_token).await?;
                if secret.uuid != object.secret_id {
                    warn!(file_id = %object.id, "download with a foreign secret");
                    return Err(ServiceError::denied());
                }
            }
            // Without a secret a private object is only reachable through
            // a download password.
            None if object.is_private() && !object.has_download_password() => {
                return Err(ServiceError::denied());
            }
            None => {}
        }

        if object.has_download_password() {
            let presented = req.download_password.as_deref().unwrap_or_default();
            if !bool::from(
                presented
                    .as_bytes()
                    .ct_eq(object.download_password.as_bytes()),
            ) {
                return Err(ServiceError::denied());
            }
        }

        if object.created_by != user_id {
            return Err(ServiceError::denied());
        }

        let url = self
            .blobs
            .signed_url(&BlobPath::for_object(&object), self.link_validity)?;
        debug!(file_id = %object.id, "download link issued");
        Ok(DownloadResponse { url })
    }

    /// Issue (once) and return the share password of a private object.
    pub async fn request_download(
        &self,
        user_id: i64,
        req: RequestDownloadRequest,
    ) -> ServiceResult<RequestDownloadResponse> {
        let object = self.find_object(&req.file_id, &req.token).await?;
        let secret = self.secrets.verify_access_token(&req.secret).await?;
        if secret.uuid != object.secret_id || object.created_by != user_id {
            return Err(ServiceError::denied());
        }

        let password = if object.has_download_password() {
            object.download_password.clone()
        } else {
            let candidate = new_download_password();
            if self
                .objects
                .set_download_password_once(&object.id, &candidate)
                .await?
            {
                info!(file_id = %object.id, "download password issued");
                candidate
            } else {
                // Another request issued one first.
                self.find_object(&object.id, &object.token)
                    .await?
                    .download_password
            }
        };

        Ok(RequestDownloadResponse {
            url: share_url(&self.public_url, &object.id, &object.token),
            password,
            file_name: object.file_name,
        })
    }

    /// Public facts about an object for a share-link holder.
    pub async fn file_info(&self, req: FileInfoRequest) -> ServiceResult<FileInfoResponse> {
        let object = self.find_object(&req.file_id, &req.token).await?;
        Ok(FileInfoResponse {
            has_secret: object.is_private(),
            password_required: object.has_download_password(),
            file_id: object.id,
            file_name: object.file_name,
            ext: object.ext,
            mime_type: object.mime_type,
            file_size: object.file_size,
        })
    }

    async fn find_object(&self, file_id: &str, token: &str) -> ServiceResult<StorageObject> {
        let file_id = file_id.trim();
        let token = token.trim();
        if file_id.is_empty() {
            return Err(ServiceError::invalid("file id is required"));
        }
        if token.is_empty() {
            return Err(ServiceError::invalid("token is required"));
        }
        self.objects
            .find(&FindObjectBy::id_and_token(file_id, token))
            .await?
            .ok_or_else(|| ServiceError::not_found("file not found"))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
