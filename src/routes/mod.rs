/// Application routes configuration
use crate::handlers::{
    broadcast_batch, fusion, health, save_subscription, status, trigger_test_push,
    trigger_test_push_for_me, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Subscriber endpoints
        .route("/save-subscription", post(save_subscription))
        .route("/trigger-test-push-for-me", post(trigger_test_push_for_me))
        // Operator endpoints, secret required
        .route("/status", get(status))
        .route("/trigger-test-push", get(trigger_test_push))
        .route("/broadcast-batch", post(broadcast_batch))
        // Dashboard
        .route("/fusion", get(fusion))
        .with_state(state)
}
