//! Blob transfer gateway.
//!
//! The upload and download flows talk to the blob store only through
//! [`BlobGateway`]: streamed puts, staged blocks, block-list commits and
//! signed read links. [`LocalBlobGateway`] keeps everything under one
//! directory on local disk:
//!
//! ```text
//! {root}/{path}                        committed blob
//! {root}/.staging/{path}/{hex(block)}  staged blocks, kept until discarded
//! {root}/.manifests/{path}.json        committed block list and size
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    models::payload::{ByteStream, body_from},
    services::naming::BlobPath,
};

const STAGING_DIR: &str = ".staging";
const MANIFEST_DIR: &str = ".manifests";
const MAX_BLOB_PATH_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob path")]
    InvalidPath,
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidBlockList(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("link expired")]
    Expired,
    #[error("link validity out of range")]
    LinkValidity,
    /// The body being written failed to produce its next piece.
    #[error("reading upload body: {0}")]
    Body(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("blob manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Size and block count of a committed blob, as recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedBlob {
    pub size_bytes: u64,
    pub block_count: u64,
}

#[async_trait]
pub trait BlobGateway: Send + Sync {
    /// Stream a whole blob to `path`. `on_progress` receives the cumulative
    /// number of bytes written. Returns the final size.
    async fn upload_stream(
        &self,
        path: &BlobPath,
        body: ByteStream<'_>,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> BlobResult<u64>;

    /// Stage one uncommitted block. Staging the same id again replaces it.
    /// Returns the block size.
    async fn stage_block(
        &self,
        path: &BlobPath,
        block_id: &str,
        body: ByteStream<'_>,
    ) -> BlobResult<u64>;

    /// Assemble the named staged blocks, in list order, into the blob.
    /// Staged blocks stay in place until [`BlobGateway::discard_staged`].
    async fn commit_block_list(&self, path: &BlobPath, block_ids: &[String]) -> BlobResult<()>;

    /// Drop every staged block of `path`.
    async fn discard_staged(&self, path: &BlobPath) -> BlobResult<()>;

    async fn committed_size(&self, path: &BlobPath) -> BlobResult<CommittedBlob>;

    /// Time-limited, credential-free read link.
    fn signed_url(&self, path: &BlobPath, validity: Duration) -> BlobResult<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    size_bytes: u64,
    blocks: Vec<ManifestBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestBlock {
    id: String,
    size_bytes: u64,
}

/// Filesystem-backed blob store. Read links carry an expiry and a
/// sha256 digest over the signing key, the path and that expiry.
#[derive(Clone)]
pub struct LocalBlobGateway {
    root: PathBuf,
    public_url: String,
    signing_key: String,
}

impl LocalBlobGateway {
    pub fn new(
        root: impl Into<PathBuf>,
        public_url: impl Into<String>,
        signing_key: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject paths that could escape the root or collide with the
    /// bookkeeping directories.
    fn ensure_path_safe(path: &BlobPath) -> BlobResult<()> {
        let raw = path.as_str();
        if raw.is_empty() || raw.len() > MAX_BLOB_PATH_LEN || raw.starts_with('/') {
            return Err(BlobError::InvalidPath);
        }
        if raw
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BlobError::InvalidPath);
        }
        if raw
            .split('/')
            .any(|segment| segment.is_empty() || segment.starts_with('.'))
        {
            return Err(BlobError::InvalidPath);
        }
        Ok(())
    }

    fn blob_file(&self, path: &BlobPath) -> PathBuf {
        self.root.join(path.as_str())
    }

    fn staging_dir(&self, path: &BlobPath) -> PathBuf {
        self.root.join(STAGING_DIR).join(path.as_str())
    }

    fn manifest_file(&self, path: &BlobPath) -> PathBuf {
        self.root
            .join(MANIFEST_DIR)
            .join(format!("{}.json", path.as_str()))
    }

    /// hex(sha256(key \n path \n expires_at)).
    fn signature(&self, path: &str, expires_at: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_key.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires_at.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check a link produced by [`BlobGateway::signed_url`].
    pub fn verify(&self, path: &BlobPath, expires_at: i64, signature: &str) -> BlobResult<()> {
        Self::ensure_path_safe(path)?;
        let expected = self.signature(path.as_str(), expires_at);
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(BlobError::InvalidSignature);
        }
        if Utc::now().timestamp() > expires_at {
            return Err(BlobError::Expired);
        }
        Ok(())
    }

    /// Open a committed blob for reading. Returns the handle and its size.
    pub async fn open(&self, path: &BlobPath) -> BlobResult<(File, u64)> {
        Self::ensure_path_safe(path)?;
        let file = File::open(self.blob_file(path))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => BlobError::NotFound(path.to_string()),
                _ => BlobError::Io(err),
            })?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    async fn write_manifest(&self, path: &BlobPath, manifest: &Manifest) -> BlobResult<()> {
        let bytes = Bytes::from(serde_json::to_vec(manifest)?);
        write_atomic(&self.manifest_file(path), body_from(bytes), &|_| {}).await?;
        Ok(())
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobGateway for LocalBlobGateway {
    async fn upload_stream(
        &self,
        path: &BlobPath,
        body: ByteStream<'_>,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> BlobResult<u64> {
        Self::ensure_path_safe(path)?;
        let size_bytes = write_atomic(&self.blob_file(path), body, on_progress).await?;
        self.write_manifest(
            path,
            &Manifest {
                size_bytes,
                blocks: Vec::new(),
            },
        )
        .await?;
        debug!(blob = %path, size_bytes, "blob written");
        Ok(size_bytes)
    }

    async fn stage_block(
        &self,
        path: &BlobPath,
        block_id: &str,
        body: ByteStream<'_>,
    ) -> BlobResult<u64> {
        Self::ensure_path_safe(path)?;
        if block_id.is_empty() {
            return Err(BlobError::InvalidBlockList("empty block id".into()));
        }
        let target = self.staging_dir(path).join(hex::encode(block_id));
        let size_bytes = write_atomic(&target, body, &|_| {}).await?;
        debug!(blob = %path, block_id, size_bytes, "block staged");
        Ok(size_bytes)
    }

    async fn commit_block_list(&self, path: &BlobPath, block_ids: &[String]) -> BlobResult<()> {
        Self::ensure_path_safe(path)?;
        if block_ids.is_empty() {
            return Err(BlobError::InvalidBlockList("empty block list".into()));
        }

        let staging = self.staging_dir(path);
        let mut sources = Vec::with_capacity(block_ids.len());
        for id in block_ids {
            let source = staging.join(hex::encode(id));
            if !fs::try_exists(&source).await? {
                return Err(BlobError::InvalidBlockList(format!(
                    "block `{id}` was never staged"
                )));
            }
            sources.push((id, source));
        }

        let target = self.blob_file(path);
        let parent = target.parent().ok_or(BlobError::InvalidPath)?;
        fs::create_dir_all(parent).await?;
        let tmp = TempPath::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
        let mut file = File::create(tmp.path()).await?;

        let mut manifest = Manifest::default();
        for (id, source) in sources {
            let mut block = File::open(&source).await?;
            let size_bytes = tokio::io::copy(&mut block, &mut file).await?;
            manifest.size_bytes += size_bytes;
            manifest.blocks.push(ManifestBlock {
                id: id.clone(),
                size_bytes,
            });
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tmp.persist(&target).await?;

        self.write_manifest(path, &manifest).await?;

        debug!(
            blob = %path,
            blocks = manifest.blocks.len(),
            size_bytes = manifest.size_bytes,
            "block list committed"
        );
        Ok(())
    }

    async fn discard_staged(&self, path: &BlobPath) -> BlobResult<()> {
        Self::ensure_path_safe(path)?;
        let staging = self.staging_dir(path);
        match fs::remove_dir_all(&staging).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        if let Some(parent) = staging.parent() {
            self.prune_empty_dirs(parent, &self.root.join(STAGING_DIR))
                .await;
        }
        debug!(blob = %path, "staged blocks discarded");
        Ok(())
    }

    async fn committed_size(&self, path: &BlobPath) -> BlobResult<CommittedBlob> {
        Self::ensure_path_safe(path)?;
        match fs::read(self.manifest_file(path)).await {
            Ok(raw) => {
                let manifest: Manifest = serde_json::from_slice(&raw)?;
                Ok(CommittedBlob {
                    size_bytes: manifest.size_bytes,
                    block_count: manifest.blocks.len() as u64,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let (_, size_bytes) = self.open(path).await?;
                Ok(CommittedBlob {
                    size_bytes,
                    block_count: 0,
                })
            }
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    fn signed_url(&self, path: &BlobPath, validity: Duration) -> BlobResult<String> {
        Self::ensure_path_safe(path)?;
        let expires_at = Utc::now()
            .checked_add_signed(validity)
            .ok_or(BlobError::LinkValidity)?
            .timestamp();
        let sig = self.signature(path.as_str(), expires_at);
        Ok(format!(
            "{}/blobs/{}?se={expires_at}&sig={sig}",
            self.public_url,
            path.as_str()
        ))
    }
}

/// Temporary file that is removed on drop unless persisted.
///
/// Dropping an upload future mid-stream leaves nothing behind.
struct TempPath(Option<PathBuf>);

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self(Some(path))
    }

    fn path(&self) -> &Path {
        self.0.as_deref().unwrap_or_else(|| Path::new(""))
    }

    async fn persist(mut self, target: &Path) -> io::Result<()> {
        let Some(tmp) = self.0.take() else {
            return Err(io::Error::other("temporary file already persisted"));
        };
        let result = match fs::rename(&tmp, target).await {
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(target).await?;
                fs::rename(&tmp, target).await
            }
            other => other,
        };
        if result.is_err() {
            self.0 = Some(tmp);
        }
        result
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Stream `body` into a temp file beside `target`, fsync, then rename.
async fn write_atomic(
    target: &Path,
    mut body: ByteStream<'_>,
    on_progress: &(dyn Fn(u64) + Send + Sync),
) -> BlobResult<u64> {
    let parent = target.parent().ok_or(BlobError::InvalidPath)?;
    fs::create_dir_all(parent).await?;
    let tmp = TempPath::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
    let mut file = File::create(tmp.path()).await?;

    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(BlobError::Body)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        on_progress(written);
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tmp.persist(target).await?;
    Ok(written)
}
