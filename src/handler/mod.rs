use crate::app::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

pub mod request_log;
pub mod swml;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/swml/inbound", post(swml::inbound_handler))
        .route("/swml/outbound", post(swml::outbound_handler))
        .route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": crate::version::get_short_version(),
    }))
}
