use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/-/healthy", get(health))
        .route("/reload", get(reload).post(reload))
        .route("/-/reload", get(reload).post(reload))
}

async fn health() -> &'static str {
    "ok"
}

/// GET|POST /-/reload
///
/// Re-reads the profile file. On failure the running table stays in place.
async fn reload(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    match state.dispatcher.profiles().reload().await {
        Ok(table) => {
            state.metrics.record_reload(true);
            info!(profiles = table.len(), "Reload succeeded");
            Ok("ok")
        }
        Err(e) => {
            state.metrics.record_reload(false);
            error!(error = %e, "Failed to reload profile configuration");
            Err(ApiError::Internal(format!("reload failed: {e}")))
        }
    }
}
