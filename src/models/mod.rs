//! Core data models for the media storage gateway.
//!
//! `object` and `secret` map to database tables via `sqlx::FromRow`;
//! `payload` holds the plain structs crossing the handler/service boundary.

pub mod object;
pub mod payload;
pub mod secret;
