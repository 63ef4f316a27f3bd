//! Database operations for the binding workflow.
//!
//! # Tables
//!
//! - `wechat_user_bindings` - One row per WeChat identity (owned by this service)
//! - `users`, `account_books`, `families`, `family_members` - Owned by the main
//!   application and only read here (see [`crate::services::accounts`])
//!
//! # Migrations
//!
//! Migrations are stored in `crates/wechat/migrations/` and run via:
//! ```bash
//! cargo run -p zhiweijz-cli -- migrate
//! ```

pub mod bindings;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use zhiweijz_core::ExternalId;

use crate::models::{Binding, BindingWrite};

pub use bindings::PgBindingStore;
pub use memory::MemoryBindingStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// The row changed since it was read.
    #[error("stale write: {0}")]
    Conflict(String),
}

/// Persistent storage for bindings.
///
/// Writes are conditional on the version that was read: a `save` with
/// `expected_version = None` only succeeds if no row exists yet, and a save
/// with `Some(v)` only succeeds if the row is still at version `v`. A lost
/// race yields [`RepositoryError::Conflict`].
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Look up the binding row for an identity, active or not.
    async fn find(&self, external_id: &ExternalId) -> Result<Option<Binding>, RepositoryError>;

    /// Create or re-bind, marking the row active.
    async fn save(
        &self,
        write: BindingWrite,
        expected_version: Option<i32>,
    ) -> Result<Binding, RepositoryError>;

    /// Soft-delete: clear `is_active` and keep the row.
    async fn deactivate(
        &self,
        external_id: &ExternalId,
        expected_version: i32,
    ) -> Result<Binding, RepositoryError>;

    /// Number of active bindings.
    async fn count_active(&self) -> Result<i64, RepositoryError>;

    /// Connectivity check for the readiness endpoint.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
