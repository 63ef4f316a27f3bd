//! WeChat API errors.

use thiserror::Error;

/// Errors that can occur when calling the WeChat API.
#[derive(Debug, Error)]
pub enum WechatError {
    /// HTTP request failed.
    #[error("WeChat request failed: {0}")]
    Request(String),

    /// Failed to parse response.
    #[error("WeChat response error: {0}")]
    Response(String),

    /// The API answered with a non-zero `errcode`.
    #[error("WeChat API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The response carried an identity the service cannot accept.
    #[error("invalid openid from WeChat: {0}")]
    InvalidIdentity(String),
}
