//! Secret lifecycle: create, retrieve (token rotation), pin reset, and
//! access-token resolution for the private upload/download paths.

use bcrypt::{hash, verify};
use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{
        payload::{
            CreateSecretRequest, ResetPinCodeRequest, ResetPinCodeResponse, RetrieveSecretRequest,
            SecretResponse,
        },
        secret::Secret,
    },
    services::{
        error::{ServiceError, ServiceResult},
        naming::{is_valid_pin, new_token},
        repository::{FindSecretBy, SecretRepository},
    },
};

#[derive(Clone)]
pub struct SecretService {
    secrets: Arc<dyn SecretRepository>,
    /// Process-wide key that grants `is_master`. Empty disables master secrets.
    master_key: String,
    hash_cost: u32,
}

impl SecretService {
    pub fn new(
        secrets: Arc<dyn SecretRepository>,
        master_key: impl Into<String>,
        hash_cost: u32,
    ) -> Self {
        Self {
            secrets,
            master_key: master_key.into(),
            hash_cost,
        }
    }

    pub async fn create_secret(
        &self,
        user_id: i64,
        req: CreateSecretRequest,
    ) -> ServiceResult<SecretResponse> {
        let username = req.username.trim().to_string();
        if username.is_empty() {
            return Err(ServiceError::invalid("username is required"));
        }
        if req.password.is_empty() {
            return Err(ServiceError::invalid("password is required"));
        }
        if self
            .secrets
            .find(&FindSecretBy::username(&username))
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "username already has a secret".into(),
            ));
        }
        if !is_valid_pin(&req.pin_code) {
            return Err(ServiceError::invalid("pin code must be 4 digits"));
        }

        let is_master = self.is_master_key(&req.master_key);
        let cost = self.hash_cost;
        let password = req.password;
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost)).await??;

        let secret = Secret {
            uuid: Uuid::new_v4().to_string(),
            username,
            password_hash,
            pin_code: req.pin_code,
            access_token: new_token(),
            is_master,
            created_by: user_id,
            created_at: Utc::now(),
        };
        self.secrets.insert(&secret).await?;

        info!(secret_id = %secret.uuid, is_master, "secret created");
        Ok(SecretResponse {
            user_id: secret.uuid,
            access_token: secret.access_token,
        })
    }

    /// Exchange username and password for a fresh access token. The
    /// previous token stops working.
    pub async fn retrieve_secret(&self, req: RetrieveSecretRequest) -> ServiceResult<SecretResponse> {
        let secret = self
            .secrets
            .find(&FindSecretBy::username(req.username.trim()))
            .await?
            .ok_or_else(|| ServiceError::not_found("username not found"))?;

        let stored = secret.password_hash.clone();
        let password = req.password;
        let matches = tokio::task::spawn_blocking(move || verify(password, &stored)).await?;
        if !matches.unwrap_or(false) {
            warn!(secret_id = %secret.uuid, "secret retrieval with wrong password");
            return Err(ServiceError::unauthorized("password is incorrect"));
        }

        let access_token = new_token();
        if !self
            .secrets
            .update_access_token(&secret.uuid, &access_token)
            .await?
        {
            return Err(ServiceError::not_found("username not found"));
        }

        info!(secret_id = %secret.uuid, "access token rotated");
        Ok(SecretResponse {
            user_id: secret.uuid,
            access_token,
        })
    }

    pub async fn reset_pin_code(&self, req: ResetPinCodeRequest) -> ServiceResult<ResetPinCodeResponse> {
        if !is_valid_pin(&req.new_pin_code) {
            return Err(ServiceError::invalid("pin code must be 4 digits"));
        }
        let secret = self.verify_access_token(&req.access_token).await?;
        let updated = self
            .secrets
            .update_pin_code(&secret.uuid, &req.new_pin_code)
            .await?;
        info!(secret_id = %secret.uuid, "pin code reset");
        Ok(ResetPinCodeResponse { updated })
    }

    /// Resolve an access token to its secret, or fail `Unauthorized`.
    pub async fn verify_access_token(&self, access_token: &str) -> ServiceResult<Secret> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(ServiceError::unauthorized("missing access token"));
        }
        self.secrets
            .find(&FindSecretBy::access_token(access_token))
            .await?
            .ok_or_else(|| ServiceError::unauthorized("invalid access token"))
    }

    fn is_master_key(&self, candidate: &str) -> bool {
        !self.master_key.is_empty()
            && bool::from(candidate.as_bytes().ct_eq(self.master_key.as_bytes()))
    }
}
