//! Maps crate errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use acme::AcmeError;
use db::DbError;
use engine::EngineError;
use queue::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    InvalidGraph(#[from] EngineError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Database(e) if e.is_not_found() => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR"),
            Self::Dispatch(DispatchError::Database(e)) if e.is_not_found() => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            Self::Dispatch(e) if e.is_conflict() => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Dispatch(DispatchError::InvalidGraph(_) | DispatchError::InvalidCron { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_WORKFLOW")
            }
            Self::Dispatch(_) => (StatusCode::SERVICE_UNAVAILABLE, "DISPATCHER_ERROR"),
            Self::InvalidGraph(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_WORKFLOW"),
            Self::Acme(AcmeError::Config(_)) => (StatusCode::BAD_REQUEST, "ACME_CONFIG_ERROR"),
            Self::Acme(_) => (StatusCode::BAD_GATEWAY, "ACME_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            error!(error = %self, code, "request failed");
        }
        (status, Json(json!({ "error": self.to_string(), "code": code }))).into_response()
    }
}
