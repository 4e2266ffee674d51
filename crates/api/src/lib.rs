//! HTTP surface of the storefront order saga.
//!
//! Routes client requests and provider webhooks to the saga coordinator,
//! with structured logging (tracing) and Prometheus metrics. The background
//! sweep and the outbox relay live in [`workers`].

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::submit))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/ship", post(routes::orders::ship))
        .route("/orders/{id}/deliver", post(routes::orders::deliver))
        .route("/payments/webhook", post(routes::payments::webhook))
        .route("/payments/{order_id}", get(routes::payments::status))
        .route(
            "/inventory/{product_id}",
            put(routes::inventory::restock).get(routes::inventory::stock_level),
        )
        .route("/catalog/{product_id}", put(routes::catalog::set_price))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
