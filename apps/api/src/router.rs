use std::sync::Arc;

use axum::{
    Router,
    routing::get,
    Json,
};
use serde_json::json;

use shared_config::AppConfig;
use slot_cell::router::slot_routes;
use slot_cell::SlotEngine;

pub fn create_router(config: Arc<AppConfig>, engine: Arc<SlotEngine>) -> Router {
    Router::new()
        .route("/", get(|| async { "Slot engine API is running!" }))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .merge(slot_routes(config, engine))
}
