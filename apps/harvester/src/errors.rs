use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::PipelineError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Fetch { .. } => AppError::Upstream(err.to_string()),
            PipelineError::UnitFailed { .. } => AppError::Extraction(err.to_string()),
            PipelineError::Storage(e) => AppError::Storage(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotImplemented(msg) => {
                (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED", msg.clone())
            }
            AppError::Upstream(msg) => {
                tracing::error!("Upstream error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "A source page could not be fetched".to_string(),
                )
            }
            AppError::Extraction(msg) => {
                tracing::error!("Extraction error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTRACTION_ERROR",
                    "An AI processing error aborted the run".to_string(),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::pipeline::models::OutcomeError;

    #[test]
    fn test_pipeline_errors_map_to_status() {
        let fetch: AppError = PipelineError::Fetch {
            url: "https://news.example".to_string(),
            source: FetchError::Status {
                url: "https://news.example".to_string(),
                status: 503,
            },
        }
        .into();
        assert_eq!(fetch.into_response().status(), StatusCode::BAD_GATEWAY);

        let unit: AppError = PipelineError::UnitFailed {
            page: 0,
            index: 3,
            error: OutcomeError::Service("boom".to_string()),
        }
        .into();
        assert_eq!(unit.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_not_implemented_is_501() {
        let response = AppError::NotImplemented("linkedin".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
