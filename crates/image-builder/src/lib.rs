//! Image Builder
//!
//! REST facade in front of the image build service. Compose requests are
//! checked against the org quota, their repositories, upload target and
//! customizations are resolved, and the translated request is submitted
//! downstream. Composes, clones and blueprints are stored per org.

pub mod blueprints;
pub mod clients;
pub mod compose;
pub mod config;
pub mod customizations;
pub mod distribution;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod quota;
pub mod repositories;
pub mod storage;
pub mod upload;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use compose::ComposeService;
pub use config::Config;
pub use handlers::AppState;
pub use metrics::Metrics;

/// Both API versions are served by the same handlers.
pub const API_PREFIXES: [&str; 2] = ["/api/image-builder/v1", "/api/image-builder/v1.0"];

fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/version", get(handlers::version_handler))
        .route("/ready", get(handlers::ready_handler))
        .route("/distributions", get(handlers::distributions_handler))
        .route(
            "/architectures/{distribution}",
            get(handlers::architectures_handler),
        )
        .route("/compose", post(handlers::compose_handler))
        .route("/composes", get(handlers::composes_handler))
        .route(
            "/composes/{id}",
            get(handlers::compose_status_handler).delete(handlers::delete_compose_handler),
        )
        .route(
            "/composes/{id}/metadata",
            get(handlers::compose_metadata_handler),
        )
        .route("/composes/{id}/clone", post(handlers::clone_compose_handler))
        .route("/composes/{id}/clones", get(handlers::compose_clones_handler))
        .route("/clones/{id}", get(handlers::clone_status_handler))
        .route(
            "/blueprints",
            get(handlers::blueprints_handler).post(handlers::create_blueprint_handler),
        )
        .route(
            "/blueprints/{id}",
            get(handlers::get_blueprint_handler)
                .put(handlers::update_blueprint_handler)
                .delete(handlers::delete_blueprint_handler),
        )
        .route(
            "/blueprints/{id}/export",
            get(handlers::export_blueprint_handler),
        )
        .route(
            "/blueprints/{id}/compose",
            post(handlers::compose_blueprint_handler),
        )
        .route(
            "/blueprints/{id}/composes",
            get(handlers::blueprint_composes_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            handlers::track_duration,
        ))
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler));
    for prefix in API_PREFIXES {
        router = router.nest(prefix, api_routes(shared_state.clone()));
    }

    router
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
