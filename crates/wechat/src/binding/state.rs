//! Binding session states and their transitions.
//!
//! Pure: guards that need I/O (credential checks, book ownership, version
//! checks) live in [`super::BindingService`], which only applies events this
//! function accepts.

use zhiweijz_core::{AccountBookId, UserId};

use crate::models::Binding;

/// Where one external identity stands in the binding workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// No active binding
    Unbound,
    /// Credentials verified (or bound user revisiting); a book must be chosen
    AwaitingSelection {
        user_id: UserId,
        /// Book of the existing binding, shown on the re-bind page
        current: Option<AccountBookId>,
    },
    Bound {
        user_id: UserId,
        account_book_id: Option<AccountBookId>,
    },
    /// Unbind requested, soft delete pending
    Unbinding { user_id: UserId },
}

/// Inputs that move the workflow forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingEvent {
    CredentialsVerified { user_id: UserId },
    CredentialsRejected,
    /// Bound user opened the binding page again
    Revisit,
    SelectBook { account_book_id: AccountBookId },
    Unbind,
    UnbindCommitted,
}

/// An event that does not apply in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event {event:?} not allowed in state {state:?}")]
pub struct InvalidTransition {
    pub state: BindingState,
    pub event: BindingEvent,
}

impl BindingState {
    /// State implied by a stored row.
    #[must_use]
    pub fn of(binding: Option<&Binding>) -> Self {
        match binding {
            Some(b) if b.is_active => Self::Bound {
                user_id: b.user_id,
                account_book_id: b.account_book_id,
            },
            _ => Self::Unbound,
        }
    }

    /// Apply `event`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the event does not apply.
    pub const fn apply(self, event: BindingEvent) -> Result<Self, InvalidTransition> {
        let next = match (self, event) {
            (Self::Unbound, BindingEvent::CredentialsVerified { user_id }) => {
                Self::AwaitingSelection {
                    user_id,
                    current: None,
                }
            }
            (Self::Unbound, BindingEvent::CredentialsRejected) => Self::Unbound,
            // signing in again switches the binding to that account
            (Self::Bound { .. }, BindingEvent::CredentialsVerified { user_id }) => {
                Self::AwaitingSelection {
                    user_id,
                    current: None,
                }
            }
            (state @ Self::Bound { .. }, BindingEvent::CredentialsRejected) => state,
            (
                Self::Bound {
                    user_id,
                    account_book_id,
                },
                BindingEvent::Revisit,
            ) => Self::AwaitingSelection {
                user_id,
                current: account_book_id,
            },
            (Self::AwaitingSelection { user_id, .. }, BindingEvent::SelectBook { account_book_id }) => {
                Self::Bound {
                    user_id,
                    account_book_id: Some(account_book_id),
                }
            }
            (
                Self::Bound { user_id, .. } | Self::AwaitingSelection { user_id, .. },
                BindingEvent::Unbind,
            ) => Self::Unbinding { user_id },
            (Self::Unbinding { .. }, BindingEvent::UnbindCommitted) => Self::Unbound,
            (state, event) => return Err(InvalidTransition { state, event }),
        };
        Ok(next)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ids() -> (UserId, AccountBookId, AccountBookId) {
        (
            UserId::generate(),
            AccountBookId::generate(),
            AccountBookId::generate(),
        )
    }

    #[test]
    fn test_first_bind() {
        let (user_id, book, _) = ids();
        let state = BindingState::Unbound
            .apply(BindingEvent::CredentialsVerified { user_id })
            .unwrap();
        assert_eq!(
            state,
            BindingState::AwaitingSelection {
                user_id,
                current: None
            }
        );

        let state = state
            .apply(BindingEvent::SelectBook {
                account_book_id: book,
            })
            .unwrap();
        assert_eq!(
            state,
            BindingState::Bound {
                user_id,
                account_book_id: Some(book)
            }
        );
    }

    #[test]
    fn test_rejected_credentials_stay_unbound() {
        let state = BindingState::Unbound
            .apply(BindingEvent::CredentialsRejected)
            .unwrap();
        assert_eq!(state, BindingState::Unbound);
    }

    #[test]
    fn test_rebind_keeps_user_and_shows_current() {
        let (user_id, old, new) = ids();
        let bound = BindingState::Bound {
            user_id,
            account_book_id: Some(old),
        };

        let revisit = bound.apply(BindingEvent::Revisit).unwrap();
        assert_eq!(
            revisit,
            BindingState::AwaitingSelection {
                user_id,
                current: Some(old)
            }
        );

        let rebound = revisit
            .apply(BindingEvent::SelectBook {
                account_book_id: new,
            })
            .unwrap();
        assert_eq!(
            rebound,
            BindingState::Bound {
                user_id,
                account_book_id: Some(new)
            }
        );
    }

    #[test]
    fn test_unbind() {
        let (user_id, book, _) = ids();
        let bound = BindingState::Bound {
            user_id,
            account_book_id: Some(book),
        };
        let unbinding = bound.apply(BindingEvent::Unbind).unwrap();
        assert_eq!(unbinding, BindingState::Unbinding { user_id });
        assert_eq!(
            unbinding.apply(BindingEvent::UnbindCommitted).unwrap(),
            BindingState::Unbound
        );
    }

    #[test]
    fn test_select_requires_verified_user() {
        let (_, book, _) = ids();
        let err = BindingState::Unbound
            .apply(BindingEvent::SelectBook {
                account_book_id: book,
            })
            .unwrap_err();
        assert_eq!(err.state, BindingState::Unbound);
    }

    #[test]
    fn test_credentials_while_bound_switch_account() {
        let (user_id, book, _) = ids();
        let other = UserId::generate();
        let bound = BindingState::Bound {
            user_id,
            account_book_id: Some(book),
        };

        assert_eq!(bound.apply(BindingEvent::CredentialsRejected).unwrap(), bound);
        assert_eq!(
            bound
                .apply(BindingEvent::CredentialsVerified { user_id: other })
                .unwrap(),
            BindingState::AwaitingSelection {
                user_id: other,
                current: None
            }
        );
    }

    #[test]
    fn test_unbound_cannot_unbind() {
        assert!(BindingState::Unbound.apply(BindingEvent::Unbind).is_err());
    }

    #[test]
    fn test_state_of_row() {
        let (user_id, book, _) = ids();
        let now = chrono::Utc::now();
        let mut row = Binding {
            id: zhiweijz_core::BindingId::generate(),
            external_id: zhiweijz_core::ExternalId::parse("openid-1").unwrap(),
            user_id,
            account_book_id: Some(book),
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            BindingState::of(Some(&row)),
            BindingState::Bound {
                user_id,
                account_book_id: Some(book)
            }
        );

        row.is_active = false;
        assert_eq!(BindingState::of(Some(&row)), BindingState::Unbound);
        assert_eq!(BindingState::of(None), BindingState::Unbound);
    }
}
