//! Metadata store access for objects and secrets.
//!
//! Lookups are typed (`FindObjectBy`, `FindSecretBy`) and built with
//! `QueryBuilder`. Mutations that can race across requests are single SQL
//! statements: block appends use `json_insert`, commit and password
//! issuance are guarded by their current value.

use async_trait::async_trait;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};

use crate::{
    models::{object::StorageObject, secret::Secret},
    services::error::{ServiceError, ServiceResult},
};

const OBJECT_COLUMNS: &str = "id, token, ext, mime_type, file_name, file_size, download_url, \
     secret_id, download_password, pending_block_ids, total_committed_blocks, created_by, created_at";

const SECRET_COLUMNS: &str =
    "uuid, username, password_hash, pin_code, access_token, is_master, created_by, created_at";

/// Object lookup. Every predicate that is set must match.
#[derive(Debug, Clone, Default)]
pub struct FindObjectBy {
    pub id: Option<String>,
    pub token: Option<String>,
}

impl FindObjectBy {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            token: None,
        }
    }

    pub fn id_and_token(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            token: Some(token.into()),
        }
    }
}

/// Secret lookup. The first non-empty predicate, in field order, is used.
#[derive(Debug, Clone, Default)]
pub struct FindSecretBy {
    pub uuid: Option<String>,
    pub username: Option<String>,
    pub access_token: Option<String>,
}

impl FindSecretBy {
    pub fn username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Self::default()
        }
    }

    fn predicate(&self) -> Option<(&'static str, &str)> {
        [
            ("uuid", &self.uuid),
            ("username", &self.username),
            ("access_token", &self.access_token),
        ]
        .into_iter()
        .find_map(|(column, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (column, v))
        })
    }
}

#[async_trait]
pub trait ObjectRepository: Send + Sync {
    async fn insert(&self, object: &StorageObject) -> ServiceResult<()>;

    async fn find(&self, by: &FindObjectBy) -> ServiceResult<Option<StorageObject>>;

    /// Append one staged block id. False if the object does not exist.
    async fn append_pending_block(&self, id: &str, block_id: &str) -> ServiceResult<bool>;

    /// Clear the pending list and record the committed size, provided the
    /// pending list still equals `expected_pending`. False otherwise.
    async fn commit_blocks(
        &self,
        id: &str,
        expected_pending: &[String],
        file_size: i64,
        block_count: i64,
    ) -> ServiceResult<bool>;

    /// Set the download password unless one is already set. False if a
    /// password was already present.
    async fn set_download_password_once(&self, id: &str, password: &str) -> ServiceResult<bool>;
}

#[async_trait]
pub trait SecretRepository: Send + Sync {
    /// Fails with `Conflict` when the username is taken.
    async fn insert(&self, secret: &Secret) -> ServiceResult<()>;

    async fn find(&self, by: &FindSecretBy) -> ServiceResult<Option<Secret>>;

    async fn update_access_token(&self, uuid: &str, access_token: &str) -> ServiceResult<bool>;

    async fn update_pin_code(&self, uuid: &str, pin_code: &str) -> ServiceResult<bool>;
}

#[derive(Clone)]
pub struct SqliteObjectRepository {
    db: SqlitePool,
}

impl SqliteObjectRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ObjectRepository for SqliteObjectRepository {
    async fn insert(&self, object: &StorageObject) -> ServiceResult<()> {
        let pending = serde_json::to_string(&object.pending_block_ids)
            .map_err(|err| ServiceError::invalid(err.to_string()))?;
        sqlx::query(
            "INSERT INTO objects (
                id, token, ext, mime_type, file_name, file_size, download_url,
                secret_id, download_password, pending_block_ids,
                total_committed_blocks, created_by, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&object.id)
        .bind(&object.token)
        .bind(&object.ext)
        .bind(&object.mime_type)
        .bind(&object.file_name)
        .bind(object.file_size)
        .bind(&object.download_url)
        .bind(&object.secret_id)
        .bind(&object.download_password)
        .bind(pending)
        .bind(object.total_committed_blocks)
        .bind(object.created_by)
        .bind(object.created_at)
        .execute(&self.db)
        .await
        .map_err(|err| match err {
            err if is_unique_violation(&err) => {
                ServiceError::Conflict(format!("object `{}` already exists", object.id))
            }
            other => ServiceError::from(other),
        })?;
        Ok(())
    }

    async fn find(&self, by: &FindObjectBy) -> ServiceResult<Option<StorageObject>> {
        if by.id.is_none() && by.token.is_none() {
            return Err(ServiceError::invalid("object lookup needs an id or a token"));
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE 1 = 1"
        ));
        if let Some(id) = &by.id {
            builder.push(" AND id = ");
            builder.push_bind(id);
        }
        if let Some(token) = &by.token {
            builder.push(" AND token = ");
            builder.push_bind(token);
        }
        builder.push(" LIMIT 1");

        let object = builder
            .build_query_as::<StorageObject>()
            .fetch_optional(&self.db)
            .await?;
        Ok(object)
    }

    async fn append_pending_block(&self, id: &str, block_id: &str) -> ServiceResult<bool> {
        let result = sqlx::query(
            "UPDATE objects
             SET pending_block_ids = json_insert(pending_block_ids, '$[#]', ?)
             WHERE id = ?",
        )
        .bind(block_id)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit_blocks(
        &self,
        id: &str,
        expected_pending: &[String],
        file_size: i64,
        block_count: i64,
    ) -> ServiceResult<bool> {
        let expected = serde_json::to_string(expected_pending)
            .map_err(|err| ServiceError::invalid(err.to_string()))?;
        let result = sqlx::query(
            "UPDATE objects
             SET pending_block_ids = '[]', file_size = ?, total_committed_blocks = ?
             WHERE id = ? AND json(pending_block_ids) = json(?)",
        )
        .bind(file_size)
        .bind(block_count)
        .bind(id)
        .bind(expected)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_download_password_once(&self, id: &str, password: &str) -> ServiceResult<bool> {
        let result = sqlx::query(
            "UPDATE objects SET download_password = ? WHERE id = ? AND download_password = ''",
        )
        .bind(password)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub struct SqliteSecretRepository {
    db: SqlitePool,
}

impl SqliteSecretRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SecretRepository for SqliteSecretRepository {
    async fn insert(&self, secret: &Secret) -> ServiceResult<()> {
        match sqlx::query(
            "INSERT INTO secrets (
                uuid, username, password_hash, pin_code, access_token,
                is_master, created_by, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&secret.uuid)
        .bind(&secret.username)
        .bind(&secret.password_hash)
        .bind(&secret.pin_code)
        .bind(&secret.access_token)
        .bind(secret.is_master)
        .bind(secret.created_by)
        .bind(secret.created_at)
        .execute(&self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(ServiceError::Conflict(format!(
                "username `{}` already exists",
                secret.username
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn find(&self, by: &FindSecretBy) -> ServiceResult<Option<Secret>> {
        let Some((column, value)) = by.predicate() else {
            return Err(ServiceError::invalid("secret lookup needs a predicate"));
        };

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SECRET_COLUMNS} FROM secrets WHERE {column} = "
        ));
        builder.push_bind(value);
        builder.push(" LIMIT 1");

        let secret = builder
            .build_query_as::<Secret>()
            .fetch_optional(&self.db)
            .await?;
        Ok(secret)
    }

    async fn update_access_token(&self, uuid: &str, access_token: &str) -> ServiceResult<bool> {
        let result = sqlx::query("UPDATE secrets SET access_token = ? WHERE uuid = ?")
            .bind(access_token)
            .bind(uuid)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_pin_code(&self, uuid: &str, pin_code: &str) -> ServiceResult<bool> {
        let result = sqlx::query("UPDATE secrets SET pin_code = ? WHERE uuid = ?")
            .bind(pin_code)
            .bind(uuid)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
