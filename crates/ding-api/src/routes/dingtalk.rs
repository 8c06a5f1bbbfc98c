use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

use ding_core::AlertGroup;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub status: &'static str,
    pub profile: String,
    pub errcode: i64,
    pub errmsg: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{profile}/send", post(send))
}

/// POST /dingtalk/:profile/send
///
/// The body is decoded here rather than with the `Json` extractor so that
/// Alertmanager payloads are accepted whatever their content type, and so that
/// a malformed body gets the same error shape as every other failure.
async fn send(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    body: Bytes,
) -> Result<Json<SendResponse>, ApiError> {
    let group: AlertGroup = serde_json::from_slice(&body).map_err(|e| {
        warn!(profile = %profile, error = %e, "Rejected malformed alert payload");
        state.metrics.record_invalid_payload();
        ApiError::BadRequest(format!("invalid alert payload: {e}"))
    })?;

    match state.dispatcher.dispatch(&profile, &group).await {
        Ok(ack) => {
            state.metrics.record_notification(&profile, "ok");
            Ok(Json(SendResponse {
                status: "ok",
                profile,
                errcode: ack.errcode,
                errmsg: ack.errmsg,
            }))
        }
        Err(e) => {
            state.metrics.record_notification(&profile, e.kind());
            Err(e.into())
        }
    }
}
