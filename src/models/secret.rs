//! Represents a private-namespace credential bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A secret gates a private storage namespace.
///
/// Only `access_token` is accepted on upload and download paths. The
/// username/password pair is used solely to rotate that token.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Secret {
    /// Namespace id, also the `secret_id` carried by private objects.
    pub uuid: String,

    /// Unique across all secrets.
    pub username: String,

    /// bcrypt hash. The plaintext password is never stored.
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Four digits, stored in clear for low-friction recovery.
    pub pin_code: String,

    /// Bearer credential, rotated on every successful retrieve.
    #[serde(skip_serializing)]
    pub access_token: String,

    /// Granted only when the creator presented the process-wide secret key.
    pub is_master: bool,

    pub created_by: i64,

    pub created_at: DateTime<Utc>,
}
