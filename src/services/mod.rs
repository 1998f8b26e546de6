//! Upload orchestration, download authorization and secret management,
//! together with the blob and metadata stores they depend on.

pub mod blob_gateway;
pub mod download_service;
pub mod error;
pub mod naming;
pub mod progress;
pub mod repository;
pub mod secret_service;
pub mod upload_service;

#[cfg(test)]
pub mod test_support;
