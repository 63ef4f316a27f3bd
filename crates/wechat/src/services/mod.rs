//! Collaborator capabilities consumed by the webhook and binding workflow.
//!
//! Each external system is reached through a narrow trait so that the
//! workflow can be wired against `PostgreSQL` and HTTP in production and
//! against in-memory fakes in tests. Optional capabilities are held as
//! `Option<Arc<dyn Trait>>` and checked where they are used.

pub mod accounts;
pub mod credentials;
pub mod handler;
pub mod inference;
pub mod intent;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;
use thiserror::Error;

use zhiweijz_core::{AccountBookId, Email, ExternalId, UserId};

use crate::db::RepositoryError;
use crate::models::{AccountBook, AccountUser};

pub use accounts::PgAccountStore;
pub use credentials::{PasswordCredentialVerifier, ThrottledVerifier};
pub use handler::WechatMessageHandler;
pub use inference::SmartAccountingClient;

/// Failure of an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// HTTP request failed.
    #[error("{service} request failed: {message}")]
    Request {
        service: &'static str,
        message: String,
    },

    /// The service answered with an error.
    #[error("{service} returned an error: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    /// Database operation failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Read access to the main application's accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<AccountUser>, CollaboratorError>;

    /// Books owned by the user or shared with them through a family,
    /// default book first, newest next.
    async fn account_books(&self, user_id: UserId) -> Result<Vec<AccountBook>, CollaboratorError>;

    /// The book, if the user owns it or is a member of the owning family.
    async fn accessible_book(
        &self,
        user_id: UserId,
        book_id: AccountBookId,
    ) -> Result<Option<AccountBook>, CollaboratorError>;
}

/// Why a credential check did not produce a user.
///
/// The distinction is for logs only; every rejection renders the same
/// message.
#[derive(Debug, Error)]
pub enum CredentialRejection {
    #[error("no account with this email")]
    NotFound,
    #[error("wrong password")]
    WrongPassword,
    #[error("account disabled")]
    Disabled,
    #[error("too many attempts")]
    Throttled,
    #[error("credential check unavailable: {0}")]
    Unavailable(#[from] CollaboratorError),
}

/// Verifies email/password pairs against the account store.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `external_id` identifies who is attempting, for throttling.
    async fn verify(
        &self,
        external_id: &ExternalId,
        email: &Email,
        password: &SecretString,
    ) -> Result<AccountUser, CredentialRejection>;
}

/// Input handed to the inference service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceInput {
    /// Free-form accounting text such as `午餐 35`
    Text(String),
    Voice {
        media_id: Option<String>,
        transcription: Option<String>,
    },
    Image {
        url: Option<String>,
        media_id: Option<String>,
    },
    /// Read-only statistics request
    Query(StatsQuery),
}

/// Statistics the chat channel can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsQuery {
    Balance,
    Categories,
    /// Budget usage for the current period
    Budget,
    /// Latest transactions, newest first
    Recent { limit: u32 },
    /// Income and spending between two dates, both inclusive
    TimeRange {
        start: NaiveDate,
        end: NaiveDate,
        period: Period,
    },
}

impl StatsQuery {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::Categories => "categories",
            Self::Budget => "budget",
            Self::Recent { .. } => "recent",
            Self::TimeRange { .. } => "time_range",
        }
    }
}

/// Calendar unit a time-range query was phrased in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// A request to interpret one chat message into the user's account book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub user_id: UserId,
    pub account_book_id: AccountBookId,
    pub input: InferenceInput,
}

/// AI service that turns chat input into recorded transactions.
///
/// Returns the user-visible summary text.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn interpret(&self, request: InferenceRequest) -> Result<String, CollaboratorError>;
}

/// Sends out-of-band messages to a chat user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &ExternalId, text: &str) -> Result<(), CollaboratorError>;
}

/// Exchanges an OAuth authorization code for the platform identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, code: &str) -> Result<ExternalId, CollaboratorError>;
}
