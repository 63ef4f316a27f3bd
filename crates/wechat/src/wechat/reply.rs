//! Passive replies to webhook deliveries.
//!
//! A reply is either a text message addressed back to the sender or the
//! bare `success` acknowledgement, which tells the platform not to retry and
//! shows nothing to the user.

use askama::Template;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::message::InboundMessage;

/// Acknowledgement body that suppresses platform retries.
pub const ACK: &str = "success";

/// Outcome of handling one delivery, as seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Text message back to the sender
    Text {
        /// Recipient (the sender's `openid`)
        to_user: String,
        /// Official account id
        from_user: String,
        content: String,
    },
    /// Bare acknowledgement
    Ack,
}

#[derive(Template)]
#[template(path = "reply.xml")]
struct TextReplyTemplate<'a> {
    to_user: &'a str,
    from_user: &'a str,
    create_time: i64,
    content: &'a str,
}

impl Reply {
    /// Reply to `message` with `content`, swapping sender and recipient.
    ///
    /// Blank content becomes a bare acknowledgement.
    #[must_use]
    pub fn text(message: &InboundMessage, content: impl Into<String>) -> Self {
        let content = content.into();
        if content.trim().is_empty() {
            return Self::Ack;
        }
        Self::Text {
            to_user: message.external_id.as_str().to_string(),
            from_user: message.account_id.clone(),
            content,
        }
    }

    /// User-visible text, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Text { content, .. } => Some(content),
            Self::Ack => None,
        }
    }

    /// Render the XML envelope with the given Unix timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub fn render_at(&self, create_time: i64) -> askama::Result<String> {
        match self {
            Self::Text {
                to_user,
                from_user,
                content,
            } => TextReplyTemplate {
                to_user,
                from_user,
                create_time,
                content,
            }
            .render(),
            Self::Ack => Ok(ACK.to_string()),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        if matches!(self, Self::Ack) {
            return ack();
        }

        match self.render_at(chrono::Utc::now().timestamp()) {
            Ok(xml) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
                xml,
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to render reply, acknowledging instead");
                ack()
            }
        }
    }
}

/// The bare `success` acknowledgement response.
#[must_use]
pub fn ack() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        ACK,
    )
        .into_response()
}
