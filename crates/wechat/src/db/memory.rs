//! In-memory binding store.
//!
//! Used by tests and local development without `PostgreSQL`. Applies the same
//! version checks as [`super::PgBindingStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use zhiweijz_core::{BindingId, ExternalId};

use super::{BindingStore, RepositoryError};
use crate::models::{Binding, BindingWrite};

/// Binding store holding rows in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryBindingStore {
    rows: Mutex<HashMap<ExternalId, Binding>>,
}

impl MemoryBindingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that reached the store, summed over every row.
    ///
    /// Versions start at 1, so a single insert counts as one write.
    pub async fn total_writes(&self) -> i64 {
        self.rows
            .lock()
            .await
            .values()
            .map(|binding| i64::from(binding.version))
            .sum()
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn find(&self, external_id: &ExternalId) -> Result<Option<Binding>, RepositoryError> {
        Ok(self.rows.lock().await.get(external_id).cloned())
    }

    async fn save(
        &self,
        write: BindingWrite,
        expected_version: Option<i32>,
    ) -> Result<Binding, RepositoryError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let current_version = rows.get(&write.external_id).map(|b| b.version);
        if current_version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "binding for {} changed concurrently",
                write.external_id
            )));
        }

        let binding = match rows.get(&write.external_id) {
            Some(existing) => Binding {
                user_id: write.user_id,
                account_book_id: write.account_book_id,
                is_active: true,
                version: existing.version + 1,
                updated_at: now,
                ..existing.clone()
            },
            None => Binding {
                id: BindingId::generate(),
                external_id: write.external_id.clone(),
                user_id: write.user_id,
                account_book_id: write.account_book_id,
                is_active: true,
                version: 1,
                created_at: now,
                updated_at: now,
            },
        };
        rows.insert(write.external_id, binding.clone());
        Ok(binding)
    }

    async fn deactivate(
        &self,
        external_id: &ExternalId,
        expected_version: i32,
    ) -> Result<Binding, RepositoryError> {
        let mut rows = self.rows.lock().await;
        let Some(existing) = rows.get_mut(external_id) else {
            return Err(RepositoryError::NotFound);
        };
        if existing.version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "binding for {external_id} changed concurrently"
            )));
        }
        existing.is_active = false;
        existing.version += 1;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn count_active(&self) -> Result<i64, RepositoryError> {
        let rows = self.rows.lock().await;
        let count = rows.values().filter(|b| b.is_active).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
