//! Application state and router assembly.

use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::get;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::background::BackgroundTasks;
use crate::handlers;
use crate::turn::TurnDeps;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub turn: TurnDeps,
    pub keep_alive_interval_seconds: u64,
    pub max_connections: usize,
    pub background_tasks: BackgroundTasks,
}

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    // The message route serves SSE on POST; no request timeout there, the
    // turn engine owns stream lifetime. Listing on the same path gets the
    // regular timeout.
    let streaming_routes = Router::new()
        .route(
            "/tenants/{tenant_id}/conversation/messages",
            axum::routing::post(handlers::v1::send_message),
        )
        .with_state(state.clone());

    let api_routes = Router::new()
        .route(
            "/tenants/{tenant_id}/conversation/messages",
            get(handlers::v1::list_messages),
        )
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    let api_v1 = Router::new()
        .merge(streaming_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB
        .layer(ConcurrencyLimitLayer::new(max_connections));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api/v1", api_v1)
}
