//! Represents one uploaded file (public or private).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for a single logical uploaded file.
///
/// The row never stores the physical blob path. The path is recomputed from
/// `secret_id`, `token` and `ext` every time it is needed, so the layout
/// convention can only be changed in one place (`services::naming`).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StorageObject {
    /// Client-visible random identifier (UUID string).
    pub id: String,

    /// Random value bound to the blob name. Set once, never rewritten.
    pub token: String,

    /// Extension including the leading dot (e.g. ".png"), or empty.
    pub ext: String,

    /// Sniffed content type.
    pub mime_type: String,

    /// Display name shown to clients.
    pub file_name: String,

    /// Committed size in bytes. Zero while chunks are still being staged.
    pub file_size: i64,

    /// API download link handed out at upload time.
    pub download_url: String,

    /// Owning secret namespace. Empty for public objects.
    pub secret_id: String,

    /// Share password. Empty until an owner requests one.
    pub download_password: String,

    /// Staged-but-uncommitted block ids, in arrival order.
    #[sqlx(json)]
    pub pending_block_ids: Vec<String>,

    /// Number of blocks reported by the blob store at commit.
    pub total_committed_blocks: i64,

    /// Owning user.
    pub created_by: i64,

    pub created_at: DateTime<Utc>,
}

impl StorageObject {
    /// True once every staged block is committed and the size is known.
    pub fn is_committed(&self) -> bool {
        self.pending_block_ids.is_empty() && self.file_size > 0
    }

    pub fn is_private(&self) -> bool {
        !self.secret_id.is_empty()
    }

    pub fn has_download_password(&self) -> bool {
        !self.download_password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(pending: Vec<String>, size: i64) -> StorageObject {
        StorageObject {
            id: "id".into(),
            token: "token".into(),
            ext: ".bin".into(),
            mime_type: "application/octet-stream".into(),
            file_name: "name".into(),
            file_size: size,
            download_url: String::new(),
            secret_id: String::new(),
            download_password: String::new(),
            pending_block_ids: pending,
            total_committed_blocks: 0,
            created_by: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn committed_requires_no_pending_blocks_and_a_size() {
        assert!(object(vec![], 10).is_committed());
        assert!(!object(vec!["AAAA".into()], 10).is_committed());
        assert!(!object(vec![], 0).is_committed());
    }
}
