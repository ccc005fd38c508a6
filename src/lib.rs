pub mod config;
pub mod error;
pub mod model;
pub mod store;

// Providers
pub mod registry;
pub mod scm;

// Reconciliation
pub mod sync;

// HTTP surface
pub mod api;
pub mod auth;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::store::AppState;

/// Full application router, including `/healthz`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
