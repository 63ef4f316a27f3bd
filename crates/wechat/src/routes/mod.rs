//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! # Chat channel
//! GET  /webhook                - Signature handshake (echoes echostr)
//! POST /webhook                - Message delivery
//!
//! # Binding pages
//! GET  /bind                   - OAuth redirect, then credentials form or re-bind choice
//! POST /bind                   - Credentials or book selection
//! POST /unbind                 - Remove the binding
//!
//! # Operations
//! GET  /wechat/status          - Integration status (JSON)
//! ```

pub mod bind;
pub mod status;
pub mod webhook;

use axum::{
    Router,
    http::{HeaderValue, header},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::state::AppState;

/// Create the binding page routes.
///
/// Pages are served with framing and sniffing restrictions since they carry
/// a credentials form.
pub fn bind_routes() -> Router<AppState> {
    Router::new()
        .route("/bind", get(bind::page).post(bind::submit))
        .route("/unbind", post(bind::unbind))
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("SAMEORIGIN"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                )),
        )
}

/// Create all routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .route("/wechat/status", get(status::status))
        .merge(bind_routes())
}
