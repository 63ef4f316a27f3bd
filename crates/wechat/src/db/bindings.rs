//! `PostgreSQL` binding store.
//!
//! Queries are built at runtime so the crate compiles without a live
//! database; the row shape is checked by [`BindingRow`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use zhiweijz_core::{AccountBookId, BindingId, ExternalId, UserId};

use super::{BindingStore, RepositoryError};
use crate::models::{Binding, BindingWrite};

const BINDING_COLUMNS: &str = "id, openid, user_id, default_account_book_id, is_active, \
                               version, created_at, updated_at";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct BindingRow {
    id: Uuid,
    openid: String,
    user_id: Uuid,
    default_account_book_id: Option<Uuid>,
    is_active: bool,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BindingRow> for Binding {
    type Error = RepositoryError;

    fn try_from(row: BindingRow) -> Result<Self, Self::Error> {
        let external_id = ExternalId::parse(&row.openid).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid openid in database: {e}"))
        })?;

        Ok(Self {
            id: BindingId::new(row.id),
            external_id,
            user_id: UserId::new(row.user_id),
            account_book_id: row.default_account_book_id.map(AccountBookId::new),
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Binding store backed by the `wechat_user_bindings` table.
#[derive(Clone)]
pub struct PgBindingStore {
    pool: PgPool,
}

impl PgBindingStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, write: &BindingWrite) -> Result<Option<BindingRow>, RepositoryError> {
        let sql = format!(
            "INSERT INTO wechat_user_bindings \
                 (id, openid, user_id, default_account_book_id, is_active, version) \
             VALUES ($1, $2, $3, $4, TRUE, 1) \
             ON CONFLICT (openid) DO NOTHING \
             RETURNING {BINDING_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(write.external_id.as_str())
            .bind(write.user_id.as_uuid())
            .bind(write.account_book_id.map(|id| id.as_uuid()))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update(
        &self,
        write: &BindingWrite,
        expected_version: i32,
    ) -> Result<Option<BindingRow>, RepositoryError> {
        let sql = format!(
            "UPDATE wechat_user_bindings \
             SET user_id = $2, default_account_book_id = $3, is_active = TRUE, \
                 version = version + 1, updated_at = NOW() \
             WHERE openid = $1 AND version = $4 \
             RETURNING {BINDING_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(write.external_id.as_str())
            .bind(write.user_id.as_uuid())
            .bind(write.account_book_id.map(|id| id.as_uuid()))
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl BindingStore for PgBindingStore {
    async fn find(&self, external_id: &ExternalId) -> Result<Option<Binding>, RepositoryError> {
        let sql = format!("SELECT {BINDING_COLUMNS} FROM wechat_user_bindings WHERE openid = $1");
        let row = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[tracing::instrument(skip(self, write), fields(external_id = %write.external_id))]
    async fn save(
        &self,
        write: BindingWrite,
        expected_version: Option<i32>,
    ) -> Result<Binding, RepositoryError> {
        let row = match expected_version {
            None => self.insert(&write).await?,
            Some(version) => self.update(&write, version).await?,
        };

        row.ok_or_else(|| {
            RepositoryError::Conflict(format!(
                "binding for {} changed concurrently",
                write.external_id
            ))
        })?
        .try_into()
    }

    #[tracing::instrument(skip(self))]
    async fn deactivate(
        &self,
        external_id: &ExternalId,
        expected_version: i32,
    ) -> Result<Binding, RepositoryError> {
        let sql = format!(
            "UPDATE wechat_user_bindings \
             SET is_active = FALSE, version = version + 1, updated_at = NOW() \
             WHERE openid = $1 AND version = $2 \
             RETURNING {BINDING_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(external_id.as_str())
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(RepositoryError::Conflict(format!(
                "binding for {external_id} changed concurrently"
            ))),
        }
    }

    async fn count_active(&self) -> Result<i64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM wechat_user_bindings WHERE is_active")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
