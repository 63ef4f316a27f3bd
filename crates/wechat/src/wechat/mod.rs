//! WeChat official-account protocol.
//!
//! - [`signature`] - Webhook signature verification
//! - [`message`] - Inbound payload parsing and normalization
//! - [`reply`] - Passive XML replies
//! - [`client`] - Outbound API client (OAuth, custom messages, menu)

pub mod client;
pub mod error;
pub mod message;
pub mod reply;
pub mod signature;

pub use client::WechatClient;
pub use error::WechatError;
pub use message::{EventKind, InboundMessage, MessageKind, MessagePayload, NormalizeError};
pub use reply::Reply;
pub use signature::SignatureParams;
