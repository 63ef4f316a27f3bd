//! Email/password verification for the binding form.

use std::num::NonZeroU32;
use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordVerifier},
};
use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use zhiweijz_core::{Email, ExternalId};

use super::{CollaboratorError, CredentialRejection, CredentialVerifier, PgAccountStore};
use crate::models::AccountUser;

/// Attempts allowed back to back per identity.
const BURST: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

/// Limiter entries kept before idle ones are swept.
const SWEEP_THRESHOLD: usize = 10_000;

/// Checks passwords against `users.password_hash`.
///
/// The main application writes bcrypt hashes; argon2 PHC strings are accepted
/// as well.
#[derive(Clone)]
pub struct PasswordCredentialVerifier {
    accounts: PgAccountStore,
}

impl PasswordCredentialVerifier {
    #[must_use]
    pub const fn new(accounts: PgAccountStore) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl CredentialVerifier for PasswordCredentialVerifier {
    async fn verify(
        &self,
        _external_id: &ExternalId,
        email: &Email,
        password: &SecretString,
    ) -> Result<AccountUser, CredentialRejection> {
        let (user, hash) = self
            .accounts
            .credentials(email)
            .await
            .map_err(CollaboratorError::from)?
            .ok_or(CredentialRejection::NotFound)?;

        check_password(user, hash.as_deref(), password)
    }
}

/// bcrypt variants as written by the main application and older PHP tooling.
const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Accept `user` if `password` matches `hash` and the account is active.
///
/// # Errors
///
/// Returns [`CredentialRejection::WrongPassword`] for a missing, malformed, or
/// mismatched hash and [`CredentialRejection::Disabled`] for inactive users.
pub fn check_password(
    user: AccountUser,
    hash: Option<&str>,
    password: &SecretString,
) -> Result<AccountUser, CredentialRejection> {
    let hash = hash.ok_or(CredentialRejection::WrongPassword)?;
    if !password_matches(hash, password.expose_secret()) {
        return Err(CredentialRejection::WrongPassword);
    }

    if !user.is_active {
        return Err(CredentialRejection::Disabled);
    }
    Ok(user)
}

fn password_matches(hash: &str, password: &str) -> bool {
    if BCRYPT_PREFIXES.iter().any(|p| hash.starts_with(p)) {
        return bcrypt::verify(password, hash).unwrap_or(false);
    }

    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Limits credential attempts per external identity.
///
/// Five attempts in a burst, then one more every minute.
pub struct ThrottledVerifier {
    inner: Arc<dyn CredentialVerifier>,
    limiter: DefaultKeyedRateLimiter<ExternalId>,
}

impl ThrottledVerifier {
    #[must_use]
    pub fn new(inner: Arc<dyn CredentialVerifier>) -> Self {
        Self::with_quota(inner, Quota::per_minute(NonZeroU32::MIN).allow_burst(BURST))
    }

    #[must_use]
    pub fn with_quota(inner: Arc<dyn CredentialVerifier>, quota: Quota) -> Self {
        Self {
            inner,
            limiter: RateLimiter::keyed(quota),
        }
    }
}

#[async_trait]
impl CredentialVerifier for ThrottledVerifier {
    async fn verify(
        &self,
        external_id: &ExternalId,
        email: &Email,
        password: &SecretString,
    ) -> Result<AccountUser, CredentialRejection> {
        if self.limiter.len() > SWEEP_THRESHOLD {
            self.limiter.retain_recent();
        }

        if self.limiter.check_key(external_id).is_err() {
            debug!(%external_id, "Credential attempt over quota");
            return Err(CredentialRejection::Throttled);
        }

        self.inner.verify(external_id, email, password).await
    }
}
