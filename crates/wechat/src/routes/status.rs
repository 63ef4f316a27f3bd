//! Integration status for operators.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::warn;

use crate::dispatch::ProcessedMessage;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub configured: bool,
    pub inference_available: bool,
    /// `None` when the binding store is unreachable
    pub active_bindings: Option<i64>,
    pub processed: usize,
    pub success_rate: f64,
    pub recent_messages: Vec<ProcessedMessage>,
}

/// `GET /wechat/status`
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let active_bindings = match state.store().count_active().await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(error = %e, "Failed to count active bindings");
            None
        }
    };
    let stats = state.stats().snapshot();

    Json(StatusResponse {
        configured: state.wechat().is_some(),
        inference_available: state.inference_available(),
        active_bindings,
        processed: stats.total,
        success_rate: stats.success_rate,
        recent_messages: stats.recent_messages,
    })
}
