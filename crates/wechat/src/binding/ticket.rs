//! Signed tickets carried in the binding forms' hidden fields.
//!
//! A ticket names the external identity the page was opened for and, once
//! credentials are verified (or for the currently bound user on the re-bind
//! page), a [`Clearance`]: the internal user allowed to pick a book and the
//! binding version the clearance was granted against. Format:
//! `base64url(json) "." hex(hmac_sha256(base64url(json)))`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use zhiweijz_core::{ExternalId, UserId};

use crate::models::Binding;

type HmacSha256 = Hmac<Sha256>;

/// Ticket lifetime in seconds.
pub const TICKET_TTL_SECS: i64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TicketError {
    #[error("malformed ticket")]
    Malformed,
    #[error("ticket signature mismatch")]
    BadSignature,
    #[error("ticket expired")]
    Expired,
    /// Ticket was issued for someone else
    #[error("ticket does not match identity")]
    WrongIdentity,
    #[error("invalid signing key")]
    InvalidKey,
    /// The binding changed after the ticket was issued
    #[error("ticket no longer matches the binding")]
    Stale,
}

/// Permission to pick a book for one internal user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clearance {
    #[serde(rename = "u")]
    pub user_id: UserId,
    /// Binding row version when granted, 0 if there was no row
    #[serde(rename = "v")]
    pub version: i32,
}

impl Clearance {
    /// Binding version to record for a row that may not exist.
    #[must_use]
    pub fn for_row(user_id: UserId, binding: Option<&Binding>) -> Self {
        Self {
            user_id,
            version: binding.map_or(0, |b| b.version),
        }
    }

    /// Check that `binding` has not been written since this was granted.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Stale`] if the row was created, changed or
    /// unbound in between.
    pub fn check(&self, binding: Option<&Binding>) -> Result<(), TicketError> {
        if binding.map_or(0, |b| b.version) == self.version {
            Ok(())
        } else {
            Err(TicketError::Stale)
        }
    }
}

/// Verified ticket contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(rename = "e")]
    pub external_id: ExternalId,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub clearance: Option<Clearance>,
    /// Unix seconds
    #[serde(rename = "x")]
    pub expires_at: i64,
}

/// Issues and checks tickets with the binding secret.
#[derive(Clone)]
pub struct TicketSigner {
    /// Keyed MAC, cloned per use
    keyed: HmacSha256,
}

impl std::fmt::Debug for TicketSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSigner")
            .field("keyed", &"[REDACTED]")
            .finish()
    }
}

impl TicketSigner {
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidKey`] if the MAC rejects the key.
    pub fn new(key: &SecretString) -> Result<Self, TicketError> {
        let keyed = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
            .map_err(|_| TicketError::InvalidKey)?;
        Ok(Self { keyed })
    }

    #[must_use]
    pub fn issue(&self, external_id: &ExternalId, clearance: Option<Clearance>) -> String {
        self.issue_at(external_id, clearance, chrono::Utc::now().timestamp())
    }

    #[must_use]
    pub fn issue_at(
        &self,
        external_id: &ExternalId,
        clearance: Option<Clearance>,
        now: i64,
    ) -> String {
        let ticket = Ticket {
            external_id: external_id.clone(),
            clearance,
            expires_at: now + TICKET_TTL_SECS,
        };
        // serializing plain strings and integers cannot fail
        let json = serde_json::to_vec(&ticket).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(json);
        let mac = hex::encode(self.mac(body.as_bytes()).finalize().into_bytes());
        format!("{body}.{mac}")
    }

    /// Check a ticket presented for `external_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError`] if the ticket is forged, expired, or issued
    /// for another identity.
    pub fn verify(&self, token: &str, external_id: &ExternalId) -> Result<Ticket, TicketError> {
        self.verify_at(token, external_id, chrono::Utc::now().timestamp())
    }

    /// # Errors
    ///
    /// See [`TicketSigner::verify`].
    pub fn verify_at(
        &self,
        token: &str,
        external_id: &ExternalId,
        now: i64,
    ) -> Result<Ticket, TicketError> {
        let (body, mac) = token.trim().split_once('.').ok_or(TicketError::Malformed)?;
        let mac = hex::decode(mac).map_err(|_| TicketError::Malformed)?;

        self.mac(body.as_bytes())
            .verify_slice(&mac)
            .map_err(|_| TicketError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TicketError::Malformed)?;
        let ticket: Ticket = serde_json::from_slice(&json).map_err(|_| TicketError::Malformed)?;

        if ticket.expires_at <= now {
            return Err(TicketError::Expired);
        }
        if &ticket.external_id != external_id {
            return Err(TicketError::WrongIdentity);
        }
        Ok(ticket)
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(data);
        mac
    }
}
