//! Webhook signature verification.
//!
//! WeChat signs each delivery by sorting `[token, timestamp, nonce]`
//! lexicographically, concatenating them and taking the SHA-1 hex digest.
//! See <https://developers.weixin.qq.com/doc/offiaccount/Basic_Information/Access_Overview.html>.

use serde::Deserialize;
use sha1::{Digest, Sha1};

/// Signature query parameters sent with every webhook request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignatureParams {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    /// Only present on the GET verification handshake
    pub echostr: Option<String>,
}

impl SignatureParams {
    /// Returns `(signature, timestamp, nonce)` when all three are present.
    #[must_use]
    pub fn parts(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.signature.as_deref()?,
            self.timestamp.as_deref()?,
            self.nonce.as_deref()?,
        ))
    }

    /// Verify these parameters against the shared token.
    ///
    /// Missing parameters never verify.
    #[must_use]
    pub fn verify(&self, token: &str) -> bool {
        self.parts()
            .is_some_and(|(signature, timestamp, nonce)| verify(signature, timestamp, nonce, token))
    }
}

/// Compute the lowercase hex signature for a delivery.
#[must_use]
pub fn compute(token: &str, timestamp: &str, nonce: &str) -> String {
    hex::encode(digest(token, timestamp, nonce))
}

/// Check a delivery signature.
///
/// The hex comparison is case-insensitive and runs in constant time over the
/// digest bytes.
#[must_use]
pub fn verify(signature: &str, timestamp: &str, nonce: &str, token: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    constant_time_eq(&provided, &digest(token, timestamp, nonce))
}

fn digest(token: &str, timestamp: &str, nonce: &str) -> [u8; 20] {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }

    result == 0
}
