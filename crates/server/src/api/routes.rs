use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{campaigns, handlers, progress};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Campaigns
        .route("/campaigns", post(campaigns::create_campaign))
        .route("/campaigns", get(campaigns::list_campaigns))
        .route("/campaigns/{id}", get(campaigns::get_campaign))
        .route("/campaigns/{id}", delete(campaigns::delete_campaign))
        .route("/campaigns/{id}/config", post(campaigns::update_config))
        .route("/campaigns/{id}/overview", get(campaigns::get_overview))
        .route("/campaigns/{id}/stats", get(campaigns::get_stats))
        // Human assignment path
        .route("/campaigns/{id}/assign", post(campaigns::request_batch))
        .route("/campaigns/{id}/submit", post(campaigns::submit))
        // Automated run control
        .route("/campaigns/{id}/run", post(campaigns::start_run))
        .route("/campaigns/{id}/pause", post(campaigns::pause_run))
        // Clear operations
        .route("/campaigns/{id}/clear", post(campaigns::clear_output))
        .route("/campaigns/{id}/clear_all", post(campaigns::clear_all))
        // Live progress stream
        .route("/campaigns/{id}/progress", get(progress::progress_stream))
        .with_state(state);

    Router::new()
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
