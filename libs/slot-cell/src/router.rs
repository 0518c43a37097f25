// libs/slot-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::engine::SlotEngine;

pub fn slot_routes(config: Arc<AppConfig>, engine: Arc<SlotEngine>) -> Router {
    // All slot operations require authentication
    let protected_routes = Router::new()
        .route("/slots", post(handlers::create_slot))
        .route("/slots/generate", post(handlers::generate_slots))
        .route("/slots/available", get(handlers::get_available_slots))
        .route("/slots/conflicts/check", get(handlers::check_slot_conflicts))
        .route(
            "/slots/{slot_id}",
            get(handlers::get_slot)
                .put(handlers::update_slot)
                .delete(handlers::delete_slot),
        )
        .route("/slots/{slot_id}/book", post(handlers::book_slot))
        .route("/slots/{slot_id}/cancel", post(handlers::cancel_slot))
        .route("/slots/{slot_id}/complete", post(handlers::complete_slot))

        // Housekeeping, normally hit by a scheduled trigger
        .route("/practitioners/{practitioner_id}/reap", post(handlers::reap_stale_slots))

        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(engine)
}
