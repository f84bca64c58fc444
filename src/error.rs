// Error Module
// One error type for the whole service, mapped onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The external stats source stayed unreachable after the retry budget.
    #[error("stats unavailable: {0}")]
    StatsUnavailable(String),

    #[error("no active race")]
    NoActiveRace,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid race: {0}")]
    InvalidRace(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::StatsUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::NoActiveRace | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRace(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }

        let body = Json(serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
