use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    application::{resolver::StoreError, stats::StatsError},
    domain::template::TemplateError,
    infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found")]
    NotFound,
    #[error("administrative action rejected")]
    Unauthorized,
    #[error("{0} is not available yet")]
    Unavailable(&'static str),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Stats(StatsError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Stats(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Template(_) | AppError::Infra(_) | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::NotFound => "Resource not found",
            AppError::Unauthorized => "Incorrect password",
            AppError::Stats(StatsError::Timeout) => "Statistics source timed out",
            AppError::Stats(_) => "Statistics source unavailable",
            AppError::Store(_) => "Service temporarily unavailable",
            AppError::Unavailable(_) => "Not available yet",
            AppError::Template(_) => "Page rendering failed",
            AppError::Infra(_) | AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        if matches!(self, AppError::Unauthorized) {
            (status, Json(json!({ "error": message }))).into_response()
        } else {
            (status, message).into_response()
        }
    }
}
