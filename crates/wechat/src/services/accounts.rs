//! Read-only access to the main application's account tables.
//!
//! # Tables
//!
//! - `users` - `id`, `name`, `email`, `password_hash`, `is_active`
//! - `account_books` - `id`, `name`, `type` (`PERSONAL` or `FAMILY`), `user_id`,
//!   `family_id`, `is_default`, `created_at`
//! - `families` / `family_members` - shared books are visible to every member

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use zhiweijz_core::{AccountBookId, Email, UserId};

use super::{AccountStore, CollaboratorError};
use crate::db::RepositoryError;
use crate::models::{AccountBook, AccountUser};

const BOOK_SELECT: &str = "SELECT b.id, b.name, b.type::text AS kind, b.is_default, \
                                  f.name AS family_name \
                           FROM account_books b \
                           LEFT JOIN families f ON f.id = b.family_id";

const BOOK_ACCESS: &str = "(b.user_id = $1 \
                            OR (b.type::text = 'FAMILY' AND b.family_id IN \
                                (SELECT family_id FROM family_members WHERE user_id = $1)))";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: Option<String>,
    email: String,
    is_active: bool,
}

impl TryFrom<UserRow> for AccountUser {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email for user {}: {e}", row.id))
        })?;

        Ok(Self {
            id: UserId::new(row.id),
            name: row.name.unwrap_or_default(),
            email,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: Option<String>,
}

/// Account store backed by the main application's database.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// User and stored password hash for an email address.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the row is malformed.
    pub async fn credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(AccountUser, Option<String>)>, RepositoryError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT id, name, email, is_active, password_hash \
             FROM users WHERE LOWER(email) = $1",
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user = AccountUser::try_from(row.user)?;
        Ok(Some((user, row.password_hash)))
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_user(&self, id: UserId) -> Result<Option<AccountUser>, CollaboratorError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, is_active FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let user = row.map(AccountUser::try_from).transpose()?;
        Ok(user)
    }

    #[tracing::instrument(skip(self))]
    async fn account_books(&self, user_id: UserId) -> Result<Vec<AccountBook>, CollaboratorError> {
        let sql = format!(
            "{BOOK_SELECT} WHERE {BOOK_ACCESS} \
             ORDER BY b.is_default DESC, b.created_at DESC"
        );
        let books = sqlx::query_as::<_, AccountBook>(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(books)
    }

    async fn accessible_book(
        &self,
        user_id: UserId,
        book_id: AccountBookId,
    ) -> Result<Option<AccountBook>, CollaboratorError> {
        let sql = format!("{BOOK_SELECT} WHERE b.id = $2 AND {BOOK_ACCESS}");
        let book = sqlx::query_as::<_, AccountBook>(&sql)
            .bind(user_id.as_uuid())
            .bind(book_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(book)
    }
}
