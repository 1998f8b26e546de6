use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::{
        blob_gateway::LocalBlobGateway,
        download_service::DownloadService,
        progress::ProgressRegistry,
        repository::{ObjectRepository, SqliteObjectRepository, SqliteSecretRepository},
        secret_service::SecretService,
        upload_service::UploadService,
    },
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: SqlitePool,
    pub objects: Arc<dyn ObjectRepository>,
    pub blobs: Arc<LocalBlobGateway>,
    pub progress: ProgressRegistry,
    pub secrets: SecretService,
    pub uploads: UploadService,
    pub downloads: DownloadService,
}

impl AppState {
    pub fn new(config: AppConfig, db: SqlitePool) -> Self {
        let objects: Arc<dyn ObjectRepository> =
            Arc::new(SqliteObjectRepository::new(db.clone()));
        let blobs = Arc::new(LocalBlobGateway::new(
            &config.storage_dir,
            &config.public_url,
            &config.signing_key,
        ));
        let progress = ProgressRegistry::new();
        let secrets = SecretService::new(
            Arc::new(SqliteSecretRepository::new(db.clone())),
            &config.secret_key,
            config.password_hash_cost,
        );
        let uploads = UploadService::new(
            objects.clone(),
            blobs.clone(),
            secrets.clone(),
            Arc::new(progress.clone()),
            &config.public_url,
            config.upload_max_size_mb,
        );
        let downloads = DownloadService::new(
            objects.clone(),
            blobs.clone(),
            secrets.clone(),
            &config.public_url,
            config.download_validity(),
        );

        Self {
            config: Arc::new(config),
            db,
            objects,
            blobs,
            progress,
            secrets,
            uploads,
            downloads,
        }
    }
}
