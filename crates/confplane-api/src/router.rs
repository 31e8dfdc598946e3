use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::{configs, events, health};
use crate::middleware::{metrics_middleware, request_id_middleware, security_headers_middleware};
use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/configs/:name", get(configs::get_config))
        .route("/configs/:name/value", get(configs::get_config_value))
        .route("/events", get(events::stream_events))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(metrics_middleware))
}
