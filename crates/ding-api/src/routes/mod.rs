mod admin;
mod dingtalk;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/dingtalk", dingtalk::router())
        .merge(admin::router())
}
