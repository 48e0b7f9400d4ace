use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers::{health, plans, pubsub};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/plans", post(plans::create_plan))
        .route("/plans/{plan_id}", get(plans::get_plan))
        .route("/pubsub/spec-status", post(pubsub::spec_status_update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
