//! Fixtures shared by the service tests.

use chrono::Duration;
use sqlx::SqlitePool;
use std::{path::Path, sync::Arc};
use tempfile::TempDir;

use crate::{
    db,
    models::object::StorageObject,
    services::{
        blob_gateway::LocalBlobGateway,
        download_service::DownloadService,
        naming::BlobPath,
        progress::ProgressRegistry,
        repository::{
            FindObjectBy, ObjectRepository, SecretRepository, SqliteObjectRepository,
            SqliteSecretRepository,
        },
        secret_service::SecretService,
        upload_service::UploadService,
    },
};

/// bcrypt's minimum cost.
pub const TEST_HASH_COST: u32 = 4;

pub const TEST_PUBLIC_URL: &str = "http://localhost:3000";

/// Upload ceiling of the harness; large enough for 3 MB chunks.
pub const TEST_UPLOAD_MAX_MB: u64 = 4;

/// Migrated SQLite database in a temporary directory.
pub struct TestDb {
    _dir: TempDir,
    pub pool: SqlitePool,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let pool = db::connect(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        Self { _dir: dir, pool }
    }

    pub fn objects(&self) -> Arc<dyn ObjectRepository> {
        Arc::new(SqliteObjectRepository::new(self.pool.clone()))
    }

    pub fn secrets(&self) -> Arc<dyn SecretRepository> {
        Arc::new(SqliteSecretRepository::new(self.pool.clone()))
    }
}

/// Fully wired services over a temporary database and blob root.
pub struct Harness {
    pub db: TestDb,
    _blob_dir: TempDir,
    pub blobs: Arc<LocalBlobGateway>,
    pub progress: ProgressRegistry,
    pub secrets: SecretService,
    pub uploads: UploadService,
    pub downloads: DownloadService,
    pub public_url: String,
}

impl Harness {
    pub async fn new() -> Self {
        let db = TestDb::new().await;
        let blob_dir = TempDir::new().unwrap();
        let blobs = Arc::new(LocalBlobGateway::new(
            blob_dir.path(),
            TEST_PUBLIC_URL,
            "test-signing-key",
        ));
        let progress = ProgressRegistry::new();
        let secrets = SecretService::new(db.secrets(), "test-master-key", TEST_HASH_COST);
        let uploads = UploadService::new(
            db.objects(),
            blobs.clone(),
            secrets.clone(),
            Arc::new(progress.clone()),
            TEST_PUBLIC_URL,
            TEST_UPLOAD_MAX_MB,
        );
        let downloads = DownloadService::new(
            db.objects(),
            blobs.clone(),
            secrets.clone(),
            TEST_PUBLIC_URL,
            Duration::days(30),
        );
        Self {
            db,
            _blob_dir: blob_dir,
            blobs,
            progress,
            secrets,
            uploads,
            downloads,
            public_url: TEST_PUBLIC_URL.to_string(),
        }
    }

    pub async fn object(&self, id: &str) -> StorageObject {
        self.db
            .objects()
            .find(&FindObjectBy::id(id))
            .await
            .unwrap()
            .unwrap()
    }

    pub fn blob_root(&self) -> &Path {
        self.blobs.root()
    }

    pub fn blob_bytes(&self, path: &BlobPath) -> Vec<u8> {
        std::fs::read(self.blob_root().join(path.as_str())).unwrap()
    }
}
