//! `api` crate — HTTP surface.
//!
//! Routes:
//!   GET    /health
//!   GET    /api/v1/workflows
//!   GET    /api/v1/workflows/:id
//!   PUT    /api/v1/workflows/:id
//!   POST   /api/v1/workflows/:id/runs
//!   GET    /api/v1/runs/:id
//!   GET    /api/v1/runs/:id/logs
//!   POST   /api/v1/runs/:id/cancel
//!   GET    /api/v1/dispatcher/statistics
//!   GET    /api/v1/schedules
//!   GET    /api/v1/certificates/:id
//!   GET    /api/v1/certificates/:id/download
//!   POST   /api/v1/certificates/:id/revoke

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use acme::AcmeClient;
use db::Repositories;
use queue::{WorkflowDispatcher, WorkflowScheduler};

pub mod error;
pub mod handlers;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub dispatcher: WorkflowDispatcher,
    pub scheduler: WorkflowScheduler,
    pub acme: AcmeClient,
}

pub fn router(state: AppState) -> Router {
    use handlers::{certificates, runs, workflows};

    let api = Router::new()
        .route("/workflows", get(workflows::list))
        .route("/workflows/:id", get(workflows::get).put(workflows::save))
        .route("/workflows/:id/runs", post(runs::start))
        .route("/runs/:id", get(runs::get))
        .route("/runs/:id/logs", get(runs::logs))
        .route("/runs/:id/cancel", post(runs::cancel))
        .route("/dispatcher/statistics", get(runs::statistics))
        .route("/schedules", get(workflows::schedules))
        .route("/certificates/:id", get(certificates::get))
        .route("/certificates/:id/download", get(certificates::download))
        .route("/certificates/:id/revoke", post(certificates::revoke));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
