//! HTTP endpoints for courier-relay.
//!
//! Serves the key directory plus health and metrics. Every route sits
//! behind the perimeter in [`guard`]; the key routes are also rate limited.

pub mod guard;
pub mod health;
pub mod keys;
mod metrics;

use crate::server::CourierServer;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;
pub use keys::ApiError;

/// Build the HTTP router with all endpoints.
///
/// Layers run outermost first: hardening headers, body limit, declared size
/// check, content-type check, then routing. Rate limiting wraps the key
/// routes only.
pub fn build_router(server: Arc<CourierServer>) -> Router {
    let max_payload = server.config().limits.max_payload_bytes;

    let keys = Router::new()
        .route(
            "/keys/upload",
            post(keys::upload_handler).get(keys::fetch_upload_user_handler),
        )
        .route("/keys/:user_id", get(keys::fetch_handler))
        .route(
            "/keys/:user_id/one-time-count",
            get(keys::one_time_count_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            server.clone(),
            guard::rate_limit,
        ));

    let mut router = Router::new().route("/health", get(health::health_handler));
    if server.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router
        .merge(keys)
        .layer(middleware::from_fn(guard::require_json))
        .layer(middleware::from_fn_with_state(
            server.clone(),
            guard::limit_payload_size,
        ))
        .layer(DefaultBodyLimit::max(max_payload))
        .layer(middleware::from_fn(guard::security_headers))
        .layer(Extension(server))
}
