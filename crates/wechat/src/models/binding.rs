//! Binding between a WeChat identity and an internal account.

use chrono::{DateTime, Utc};

use zhiweijz_core::{AccountBookId, BindingId, ExternalId, UserId};

/// A persisted binding row.
///
/// At most one row exists per external identity. Unbinding keeps the row and
/// clears `is_active`; a later bind reactivates the same row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub id: BindingId,
    pub external_id: ExternalId,
    pub user_id: UserId,
    /// Account book that chat messages are recorded into
    pub account_book_id: Option<AccountBookId>,
    pub is_active: bool,
    /// Optimistic concurrency counter, starts at 1 and grows on every write
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Binding {
    /// Whether this binding already records exactly this active selection.
    #[must_use]
    pub fn is_selection(&self, user_id: UserId, account_book_id: AccountBookId) -> bool {
        self.is_active && self.user_id == user_id && self.account_book_id == Some(account_book_id)
    }
}

/// Values written when a binding is created or re-bound.
///
/// Every write marks the binding active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingWrite {
    pub external_id: ExternalId,
    pub user_id: UserId,
    pub account_book_id: Option<AccountBookId>,
}
