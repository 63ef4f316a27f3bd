//! Official-account webhook.
//!
//! The platform treats anything but a prompt `200` as a failure and retries,
//! so after the signature handshake every POST answers `200`: a passive
//! reply when one is ready within budget, otherwise `success`.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use tracing::{debug, instrument, warn};

use crate::state::AppState;
use crate::wechat::message::{normalize, parse_body};
use crate::wechat::reply::ack;
use crate::wechat::SignatureParams;

/// Server verification handshake.
///
/// Echoes `echostr` when the signature matches the shared token.
#[instrument(skip(state, params))]
pub async fn verify(State(state): State<AppState>, Query(params): Query<SignatureParams>) -> Response {
    let Some(wechat) = state.wechat() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "wechat not configured").into_response();
    };

    let Some(echostr) = params.echostr.clone().filter(|_| params.parts().is_some()) else {
        return (StatusCode::BAD_REQUEST, "missing parameters").into_response();
    };

    if !params.verify(wechat.token.expose_secret()) {
        warn!("Webhook verification signature mismatch");
        return (StatusCode::FORBIDDEN, "invalid signature").into_response();
    }

    debug!("Webhook verification succeeded");
    (StatusCode::OK, echostr).into_response()
}

/// Message delivery.
#[instrument(skip_all)]
pub async fn receive(
    State(state): State<AppState>,
    Query(params): Query<SignatureParams>,
    body: Bytes,
) -> Response {
    let Some(wechat) = state.wechat() else {
        warn!("Delivery received but WeChat is not configured");
        return ack();
    };

    if !params.verify(wechat.token.expose_secret()) {
        warn!(
            timestamp = params.timestamp.as_deref().unwrap_or_default(),
            "Delivery signature mismatch, ignoring"
        );
        return ack();
    }

    let Ok(body) = std::str::from_utf8(&body) else {
        warn!("Delivery body is not UTF-8");
        return ack();
    };

    let message = match parse_body(body).and_then(|raw| normalize(&raw)) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unreadable delivery");
            return ack();
        }
    };

    match message.dedup_key() {
        Some(key) => {
            if !wechat.dedup.first_delivery(&key).await {
                debug!(%key, "Duplicate delivery");
                return ack();
            }
        }
        None => debug!("Delivery has no id or timestamp; not deduplicated"),
    }

    wechat
        .dispatcher
        .dispatch(message)
        .await
        .into_reply()
        .into_response()
}
