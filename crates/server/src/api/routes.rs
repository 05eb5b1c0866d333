use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::middleware::{auth_middleware, metrics_middleware};
use super::{fate, handlers};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Everything except health checks requires authentication
    let protected = Router::new()
        .route("/config", get(handlers::get_config))
        .route("/fate/batches", post(fate::generate_batch))
        .route("/fate/batches/{id}", get(fate::get_batch))
        .route("/fate/queue/{id}", get(fate::get_queue_entry))
        .route("/fate/tickets", get(fate::list_tickets))
        .route("/fate/tickets/delete", post(fate::delete_tickets))
        .route("/fate/draw", post(fate::draw_ticket))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state);

    Router::new()
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
