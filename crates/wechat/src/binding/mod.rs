//! Account-binding workflow.
//!
//! Links a WeChat identity to an internal user and one of the user's account
//! books. The pages in [`crate::routes::bind`] and the chat commands in
//! [`crate::services::handler`] both go through [`BindingService`], which
//! checks every step against [`BindingState::apply`] before touching storage.

pub mod state;
pub mod ticket;

use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;
use tracing::{info, instrument, warn};

use zhiweijz_core::{AccountBookId, Email, ExternalId, UserId};

use crate::db::{BindingStore, RepositoryError};
use crate::models::{AccountBook, AccountUser, Binding, BindingWrite};
use crate::services::{AccountStore, CollaboratorError, CredentialRejection, CredentialVerifier};

pub use state::{BindingEvent, BindingState, InvalidTransition};
pub use ticket::{Clearance, Ticket, TicketError, TicketSigner};

/// Errors from the binding workflow.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("invalid ticket: {0}")]
    InvalidTicket(#[from] TicketError),

    /// Credentials did not produce an active user. Deliberately vague.
    #[error("credentials rejected")]
    CredentialsRejected,

    #[error("too many credential attempts")]
    Throttled,

    /// The book is not accessible to the user.
    #[error("account book not accessible")]
    OwnershipViolation,

    /// The binding changed since it was read.
    #[error("binding changed concurrently")]
    Conflict,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Upstream(#[from] CollaboratorError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for BindingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(_) => Self::Conflict,
            other => Self::Repository(other),
        }
    }
}

/// What the binding page shows when opened.
#[derive(Debug, Clone)]
pub enum BindingPage {
    /// Credentials form
    Form { ticket: String },
    /// Already bound: switch book or unbind
    Rebind {
        ticket: String,
        user: AccountUser,
        current: Option<AccountBook>,
        books: Vec<AccountBook>,
    },
}

/// Credentials accepted; the user picks a book next.
#[derive(Debug, Clone)]
pub struct Verified {
    pub ticket: String,
    pub user: AccountUser,
    pub books: Vec<AccountBook>,
}

/// A committed selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub binding: Binding,
    pub book: AccountBook,
    /// `false` when the binding already held this selection
    pub changed: bool,
}

/// Current binding as shown in chat.
#[derive(Debug, Clone)]
pub struct BindingSummary {
    pub binding: Binding,
    pub user: Option<AccountUser>,
    pub book: Option<AccountBook>,
}

/// Result of choosing a book by its position in the chat listing.
#[derive(Debug, Clone)]
pub enum BookChoice {
    NotBound,
    OutOfRange { available: usize },
    Chosen(AccountBook),
}

/// Drives binding transitions and persists them.
#[derive(Clone)]
pub struct BindingService {
    store: Arc<dyn BindingStore>,
    accounts: Arc<dyn AccountStore>,
    credentials: Arc<dyn CredentialVerifier>,
    tickets: TicketSigner,
}

impl std::fmt::Debug for BindingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingService").finish_non_exhaustive()
    }
}

impl BindingService {
    #[must_use]
    pub fn new(
        store: Arc<dyn BindingStore>,
        accounts: Arc<dyn AccountStore>,
        credentials: Arc<dyn CredentialVerifier>,
        tickets: TicketSigner,
    ) -> Self {
        Self {
            store,
            accounts,
            credentials,
            tickets,
        }
    }

    #[must_use]
    pub const fn tickets(&self) -> &TicketSigner {
        &self.tickets
    }

    /// Decide what the binding page shows for `external_id`.
    ///
    /// # Errors
    ///
    /// Returns error if storage or the account store fails.
    #[instrument(skip(self), fields(external_id = %external_id))]
    pub async fn open(&self, external_id: &ExternalId) -> Result<BindingPage, BindingError> {
        let existing = self.store.find(external_id).await?;
        let state = BindingState::of(existing.as_ref());

        let BindingState::Bound { user_id, .. } = state else {
            return Ok(BindingPage::Form {
                ticket: self.tickets.issue(external_id, None),
            });
        };

        let Some(user) = self.active_user(user_id).await? else {
            // bound account was disabled or removed; offer a fresh bind
            warn!(%user_id, "Bound user no longer active");
            return Ok(BindingPage::Form {
                ticket: self.tickets.issue(external_id, None),
            });
        };

        let BindingState::AwaitingSelection { current, .. } = state.apply(BindingEvent::Revisit)?
        else {
            return Err(InvalidTransition {
                state,
                event: BindingEvent::Revisit,
            }
            .into());
        };

        let books = self.accounts.account_books(user_id).await?;
        let current = current.and_then(|id| books.iter().find(|b| b.id == id).cloned());

        Ok(BindingPage::Rebind {
            ticket: self
                .tickets
                .issue(external_id, Some(Clearance::for_row(user_id, existing.as_ref()))),
            user,
            current,
            books,
        })
    }

    /// Check credentials and list the user's books.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::CredentialsRejected`] for any credential
    /// mismatch, [`BindingError::Throttled`] when attempts run out.
    #[instrument(skip(self, ticket, password), fields(external_id = %external_id, email = %email.masked()))]
    pub async fn submit_credentials(
        &self,
        external_id: &ExternalId,
        ticket: &str,
        email: &Email,
        password: &SecretString,
    ) -> Result<Verified, BindingError> {
        self.tickets.verify(ticket, external_id)?;

        let existing = self.store.find(external_id).await?;
        let state = BindingState::of(existing.as_ref());

        let user = match self.credentials.verify(external_id, email, password).await {
            Ok(user) => user,
            Err(CredentialRejection::Throttled) => {
                warn!("Credential attempts throttled");
                return Err(BindingError::Throttled);
            }
            Err(CredentialRejection::Unavailable(e)) => return Err(e.into()),
            Err(reason) => {
                state.apply(BindingEvent::CredentialsRejected)?;
                info!(reason = %reason, "Credential check failed");
                return Err(BindingError::CredentialsRejected);
            }
        };

        state.apply(BindingEvent::CredentialsVerified { user_id: user.id })?;
        let books = self.accounts.account_books(user.id).await?;
        info!(user_id = %user.id, books = books.len(), "Credentials verified");

        Ok(Verified {
            ticket: self
                .tickets
                .issue(external_id, Some(Clearance::for_row(user.id, existing.as_ref()))),
            user,
            books,
        })
    }

    /// Bind `external_id` to `user_id` recording into `account_book_id`.
    ///
    /// `user_id` is trusted only if the ticket cleared it against the
    /// binding as it is now; any write since (unbind, another sign-in)
    /// voids the ticket for new selections. Selecting the book the binding
    /// already holds writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::InvalidTicket`] for a stale ticket,
    /// [`BindingError::OwnershipViolation`] if the book is not
    /// accessible to the user and [`BindingError::Conflict`] if the binding
    /// changed concurrently.
    #[instrument(skip(self, ticket), fields(external_id = %external_id))]
    pub async fn select_account_book(
        &self,
        external_id: &ExternalId,
        ticket: &str,
        user_id: UserId,
        account_book_id: AccountBookId,
    ) -> Result<Selection, BindingError> {
        let ticket = self.tickets.verify(ticket, external_id)?;
        let existing = self.store.find(external_id).await?;

        let session = match ticket.clearance {
            Some(clearance) if clearance.user_id == user_id => {
                // resubmitting the selection already stored is a no-op
                let unchanged = existing
                    .as_ref()
                    .is_some_and(|b| b.is_selection(user_id, account_book_id));
                if !unchanged {
                    clearance.check(existing.as_ref())?;
                }
                BindingState::AwaitingSelection {
                    user_id,
                    current: existing
                        .as_ref()
                        .filter(|b| b.is_active && b.user_id == user_id)
                        .and_then(|b| b.account_book_id),
                }
            }
            Some(_) => return Err(TicketError::WrongIdentity.into()),
            None => BindingState::of(existing.as_ref()),
        };

        let book = self
            .accounts
            .accessible_book(user_id, account_book_id)
            .await?
            .ok_or(BindingError::OwnershipViolation)?;
        if self.active_user(user_id).await?.is_none() {
            return Err(BindingError::OwnershipViolation);
        }

        self.commit_selection(external_id, existing, session, book)
            .await
    }

    /// Soft-delete the binding. Unbinding an unbound identity is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::Conflict`] if the binding changed concurrently.
    #[instrument(skip(self, ticket), fields(external_id = %external_id))]
    pub async fn unbind(&self, external_id: &ExternalId, ticket: &str) -> Result<(), BindingError> {
        self.tickets.verify(ticket, external_id)?;
        self.unbind_unchecked(external_id).await.map(|_| ())
    }

    /// The active binding, if any.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub async fn active_binding(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Binding>, BindingError> {
        Ok(self
            .store
            .find(external_id)
            .await?
            .filter(|b| b.is_active))
    }

    /// Binding details for the chat `绑定信息` command.
    ///
    /// # Errors
    ///
    /// Returns error if storage or the account store fails.
    pub async fn summary(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<BindingSummary>, BindingError> {
        let Some(binding) = self.active_binding(external_id).await? else {
            return Ok(None);
        };

        let user = self.accounts.find_user(binding.user_id).await?;
        let book = match binding.account_book_id {
            Some(book_id) => {
                self.accounts
                    .accessible_book(binding.user_id, book_id)
                    .await?
            }
            None => None,
        };

        Ok(Some(BindingSummary { binding, user, book }))
    }

    /// Books available to the bound user, in listing order.
    ///
    /// # Errors
    ///
    /// Returns error if storage or the account store fails.
    pub async fn books_for(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Vec<AccountBook>>, BindingError> {
        match self.active_binding(external_id).await? {
            Some(binding) => Ok(Some(self.accounts.account_books(binding.user_id).await?)),
            None => Ok(None),
        }
    }

    /// Choose a book by its 1-based position in [`Self::books_for`].
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::Conflict`] if the binding changed concurrently.
    #[instrument(skip(self), fields(external_id = %external_id))]
    pub async fn choose_book(
        &self,
        external_id: &ExternalId,
        position: usize,
    ) -> Result<BookChoice, BindingError> {
        let existing = self.store.find(external_id).await?;
        let state = BindingState::of(existing.as_ref());
        let BindingState::Bound { user_id, .. } = state else {
            return Ok(BookChoice::NotBound);
        };

        let mut books = self.accounts.account_books(user_id).await?;
        let available = books.len();
        if position == 0 || position > available {
            return Ok(BookChoice::OutOfRange { available });
        }
        let book = books.swap_remove(position - 1);

        let session = state.apply(BindingEvent::Revisit)?;
        let selection = self
            .commit_selection(external_id, existing, session, book)
            .await?;
        Ok(BookChoice::Chosen(selection.book))
    }

    /// Unbind from chat, without a ticket. Returns whether a binding was
    /// deactivated.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::Conflict`] if the binding changed concurrently.
    pub async fn unbind_from_chat(&self, external_id: &ExternalId) -> Result<bool, BindingError> {
        self.unbind_unchecked(external_id).await
    }

    async fn unbind_unchecked(&self, external_id: &ExternalId) -> Result<bool, BindingError> {
        let existing = self.store.find(external_id).await?;
        let state = BindingState::of(existing.as_ref());

        let Some(binding) = existing.filter(|b| b.is_active) else {
            info!(%external_id, "Unbind requested but nothing is bound");
            return Ok(false);
        };

        let unbinding = state.apply(BindingEvent::Unbind)?;
        self.store.deactivate(external_id, binding.version).await?;
        unbinding.apply(BindingEvent::UnbindCommitted)?;

        info!(%external_id, user_id = %binding.user_id, "Binding deactivated");
        Ok(true)
    }

    async fn commit_selection(
        &self,
        external_id: &ExternalId,
        existing: Option<Binding>,
        session: BindingState,
        book: AccountBook,
    ) -> Result<Selection, BindingError> {
        let next = session.apply(BindingEvent::SelectBook {
            account_book_id: book.id,
        })?;
        let BindingState::Bound { user_id, .. } = next else {
            return Err(InvalidTransition {
                state: session,
                event: BindingEvent::SelectBook {
                    account_book_id: book.id,
                },
            }
            .into());
        };

        if let Some(binding) = existing.as_ref().filter(|b| b.is_selection(user_id, book.id)) {
            return Ok(Selection {
                binding: binding.clone(),
                book,
                changed: false,
            });
        }

        let write = BindingWrite {
            external_id: external_id.clone(),
            user_id,
            account_book_id: Some(book.id),
        };
        let binding = self
            .store
            .save(write, existing.as_ref().map(|b| b.version))
            .await?;

        info!(
            %user_id,
            account_book_id = %book.id,
            version = binding.version,
            "Binding saved"
        );
        Ok(Selection {
            binding,
            book,
            changed: true,
        })
    }

    async fn active_user(&self, user_id: UserId) -> Result<Option<AccountUser>, BindingError> {
        Ok(self
            .accounts
            .find_user(user_id)
            .await?
            .filter(|u| u.is_active))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use zhiweijz_core::AccountBookKind;

    use super::*;
    use crate::db::MemoryBindingStore;

    const PASSWORD: &str = "correct horse";

    /// Accounts and credentials backed by maps.
    #[derive(Default)]
    pub(crate) struct FakeAccounts {
        pub users: HashMap<UserId, AccountUser>,
        pub books: HashMap<UserId, Vec<AccountBook>>,
    }

    impl FakeAccounts {
        pub fn with_user(mut self, name: &str, email: &str, books: &[&str]) -> (Self, UserId) {
            let id = UserId::generate();
            self.users.insert(
                id,
                AccountUser {
                    id,
                    name: name.to_string(),
                    email: Email::parse(email).unwrap(),
                    is_active: true,
                },
            );
            let books = books
                .iter()
                .enumerate()
                .map(|(i, name)| AccountBook {
                    id: AccountBookId::generate(),
                    name: (*name).to_string(),
                    kind: AccountBookKind::Personal,
                    is_default: i == 0,
                    family_name: None,
                })
                .collect();
            self.books.insert(id, books);
            (self, id)
        }

        pub fn book(&self, user_id: UserId, index: usize) -> AccountBook {
            self.books[&user_id][index].clone()
        }
    }

    #[async_trait]
    impl AccountStore for FakeAccounts {
        async fn find_user(&self, id: UserId) -> Result<Option<AccountUser>, CollaboratorError> {
            Ok(self.users.get(&id).cloned())
        }

        async fn account_books(
            &self,
            user_id: UserId,
        ) -> Result<Vec<AccountBook>, CollaboratorError> {
            Ok(self.books.get(&user_id).cloned().unwrap_or_default())
        }

        async fn accessible_book(
            &self,
            user_id: UserId,
            book_id: AccountBookId,
        ) -> Result<Option<AccountBook>, CollaboratorError> {
            Ok(self
                .books
                .get(&user_id)
                .and_then(|books| books.iter().find(|b| b.id == book_id))
                .cloned())
        }
    }

    #[async_trait]
    impl CredentialVerifier for FakeAccounts {
        async fn verify(
            &self,
            _: &ExternalId,
            email: &Email,
            password: &SecretString,
        ) -> Result<AccountUser, CredentialRejection> {
            use secrecy::ExposeSecret;

            let user = self
                .users
                .values()
                .find(|u| &u.email == email)
                .ok_or(CredentialRejection::NotFound)?;
            if password.expose_secret() != PASSWORD {
                return Err(CredentialRejection::WrongPassword);
            }
            if !user.is_active {
                return Err(CredentialRejection::Disabled);
            }
            Ok(user.clone())
        }
    }

    struct Fixture {
        service: BindingService,
        store: Arc<MemoryBindingStore>,
        accounts: Arc<FakeAccounts>,
        user: UserId,
        openid: ExternalId,
    }

    fn fixture() -> Fixture {
        let (accounts, user) =
            FakeAccounts::default().with_user("张三", "zhangsan@qq.com", &["日常开销", "旅行"]);
        let (accounts, _) = accounts.with_user("李四", "lisi@qq.com", &["李四的账本"]);
        let accounts = Arc::new(accounts);
        let store = Arc::new(MemoryBindingStore::new());
        let tickets =
            TicketSigner::new(&SecretString::from("k8#mQ2$vL9@nR4&wX7*pT1!zY6^bH3%")).unwrap();

        Fixture {
            service: BindingService::new(
                store.clone(),
                accounts.clone(),
                accounts.clone(),
                tickets,
            ),
            store,
            accounts,
            user,
            openid: ExternalId::parse("openid-user-1").unwrap(),
        }
    }

    async fn verify(f: &Fixture) -> Verified {
        let BindingPage::Form { ticket } = f.service.open(&f.openid).await.unwrap() else {
            panic!("expected form");
        };
        f.service
            .submit_credentials(
                &f.openid,
                &ticket,
                &Email::parse("zhangsan@qq.com").unwrap(),
                &SecretString::from(PASSWORD),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_bind() {
        let f = fixture();
        let verified = verify(&f).await;
        assert_eq!(verified.user.id, f.user);
        assert_eq!(verified.books.len(), 2);

        let book = f.accounts.book(f.user, 0);
        let selection = f
            .service
            .select_account_book(&f.openid, &verified.ticket, f.user, book.id)
            .await
            .unwrap();

        assert!(selection.changed);
        assert_eq!(selection.binding.version, 1);
        assert_eq!(selection.binding.account_book_id, Some(book.id));
        assert!(selection.binding.is_active);
    }

    #[tokio::test]
    async fn test_wrong_password_is_generic() {
        let f = fixture();
        let BindingPage::Form { ticket } = f.service.open(&f.openid).await.unwrap() else {
            panic!("expected form");
        };

        for email in ["zhangsan@qq.com", "nobody@qq.com"] {
            let err = f
                .service
                .submit_credentials(
                    &f.openid,
                    &ticket,
                    &Email::parse(email).unwrap(),
                    &SecretString::from("wrong"),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, BindingError::CredentialsRejected));
        }
        assert!(f.store.find(&f.openid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeat_selection_is_noop() {
        let f = fixture();
        let verified = verify(&f).await;
        let book = f.accounts.book(f.user, 0);

        let first = f
            .service
            .select_account_book(&f.openid, &verified.ticket, f.user, book.id)
            .await
            .unwrap();
        let second = f
            .service
            .select_account_book(&f.openid, &verified.ticket, f.user, book.id)
            .await
            .unwrap();

        assert!(!second.changed);
        assert_eq!(second.binding, first.binding);
        assert_eq!(f.store.total_writes().await, 1);
    }

    #[tokio::test]
    async fn test_foreign_book_is_ownership_violation() {
        let f = fixture();
        let verified = verify(&f).await;
        let foreign = f
            .accounts
            .books
            .iter()
            .find(|(user, _)| **user != f.user)
            .map(|(_, books)| books[0].id)
            .unwrap();

        let err = f
            .service
            .select_account_book(&f.openid, &verified.ticket, f.user, foreign)
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::OwnershipViolation));
    }

    #[tokio::test]
    async fn test_anonymous_ticket_cannot_select() {
        let f = fixture();
        let BindingPage::Form { ticket } = f.service.open(&f.openid).await.unwrap() else {
            panic!("expected form");
        };
        let book = f.accounts.book(f.user, 0);

        let err = f
            .service
            .select_account_book(&f.openid, &ticket, f.user, book.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_ticket_for_other_user_rejected() {
        let f = fixture();
        let verified = verify(&f).await;
        let other = *f.accounts.users.keys().find(|id| **id != f.user).unwrap();
        let other_book = f.accounts.book(other, 0);

        let err = f
            .service
            .select_account_book(&f.openid, &verified.ticket, other, other_book.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BindingError::InvalidTicket(TicketError::WrongIdentity)
        ));
    }

    #[tokio::test]
    async fn test_rebind_and_unbind_then_rebind() {
        let f = fixture();
        let verified = verify(&f).await;
        let first = f.accounts.book(f.user, 0);
        let second = f.accounts.book(f.user, 1);
        f.service
            .select_account_book(&f.openid, &verified.ticket, f.user, first.id)
            .await
            .unwrap();

        // revisit shows the re-bind page with the current book
        let BindingPage::Rebind {
            ticket, current, ..
        } = f.service.open(&f.openid).await.unwrap()
        else {
            panic!("expected re-bind page");
        };
        assert_eq!(current.map(|b| b.id), Some(first.id));

        let rebound = f
            .service
            .select_account_book(&f.openid, &ticket, f.user, second.id)
            .await
            .unwrap();
        assert_eq!(rebound.binding.account_book_id, Some(second.id));
        assert_eq!(rebound.binding.version, 2);

        f.service.unbind(&f.openid, &ticket).await.unwrap();
        let row = f.store.find(&f.openid).await.unwrap().unwrap();
        assert!(!row.is_active);
        assert!(matches!(
            f.service.open(&f.openid).await.unwrap(),
            BindingPage::Form { .. }
        ));

        let verified = verify(&f).await;
        let reactivated = f
            .service
            .select_account_book(&f.openid, &verified.ticket, f.user, first.id)
            .await
            .unwrap();
        assert_eq!(reactivated.binding.id, row.id);
        assert!(reactivated.binding.is_active);
        assert_eq!(reactivated.binding.version, 4);
    }

    #[tokio::test]
    async fn test_unbind_when_unbound_is_noop() {
        let f = fixture();
        assert!(!f.service.unbind_from_chat(&f.openid).await.unwrap());
    }

    #[tokio::test]
    async fn test_choose_book_by_position() {
        let f = fixture();
        assert!(matches!(
            f.service.choose_book(&f.openid, 1).await.unwrap(),
            BookChoice::NotBound
        ));

        let verified = verify(&f).await;
        let first = f.accounts.book(f.user, 0);
        f.service
            .select_account_book(&f.openid, &verified.ticket, f.user, first.id)
            .await
            .unwrap();

        assert!(matches!(
            f.service.choose_book(&f.openid, 3).await.unwrap(),
            BookChoice::OutOfRange { available: 2 }
        ));
        let BookChoice::Chosen(book) = f.service.choose_book(&f.openid, 2).await.unwrap() else {
            panic!("expected a chosen book");
        };
        assert_eq!(book.name, "旅行");

        let summary = f.service.summary(&f.openid).await.unwrap().unwrap();
        assert_eq!(summary.book.map(|b| b.name), Some("旅行".to_string()));
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let f = fixture();
        let verified = verify(&f).await;
        let first = f.accounts.book(f.user, 0);
        let second = f.accounts.book(f.user, 1);
        f.service
            .select_account_book(&f.openid, &verified.ticket, f.user, first.id)
            .await
            .unwrap();

        // another writer bumps the row after our read
        let stale = f.store.find(&f.openid).await.unwrap();
        f.store
            .save(
                BindingWrite {
                    external_id: f.openid.clone(),
                    user_id: f.user,
                    account_book_id: Some(second.id),
                },
                Some(1),
            )
            .await
            .unwrap();

        let session = BindingState::AwaitingSelection {
            user_id: f.user,
            current: Some(first.id),
        };
        let err = f
            .service
            .commit_selection(&f.openid, stale, session, first)
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::Conflict));
    }

    #[tokio::test]
    async fn test_rebind_ticket_is_void_after_unbind() {
        let f = fixture();
        let verified = verify(&f).await;
        let first = f.accounts.book(f.user, 0);
        let second = f.accounts.book(f.user, 1);
        f.service
            .select_account_book(&f.openid, &verified.ticket, f.user, first.id)
            .await
            .unwrap();

        let BindingPage::Rebind { ticket, .. } = f.service.open(&f.openid).await.unwrap() else {
            panic!("expected re-bind page");
        };
        f.service.unbind(&f.openid, &ticket).await.unwrap();

        for book in [&first, &second] {
            let err = f
                .service
                .select_account_book(&f.openid, &ticket, f.user, book.id)
                .await
                .unwrap_err();
            assert!(matches!(err, BindingError::InvalidTicket(TicketError::Stale)));
        }
        assert!(!f.store.find(&f.openid).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_old_ticket_cannot_switch_back_user() {
        let f = fixture();
        let other = *f.accounts.users.keys().find(|id| **id != f.user).unwrap();

        // 张三 opens a credentials session, then 李四 signs in and binds
        let zhangsan = verify(&f).await;
        let BindingPage::Form { ticket } = f.service.open(&f.openid).await.unwrap() else {
            panic!("expected form");
        };
        let lisi = f
            .service
            .submit_credentials(
                &f.openid,
                &ticket,
                &Email::parse("lisi@qq.com").unwrap(),
                &SecretString::from(PASSWORD),
            )
            .await
            .unwrap();
        f.service
            .select_account_book(&f.openid, &lisi.ticket, other, f.accounts.book(other, 0).id)
            .await
            .unwrap();

        let err = f
            .service
            .select_account_book(
                &f.openid,
                &zhangsan.ticket,
                f.user,
                f.accounts.book(f.user, 0).id,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::InvalidTicket(TicketError::Stale)));

        let row = f.store.find(&f.openid).await.unwrap().unwrap();
        assert_eq!(row.user_id, other);
    }
}
