//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::compress::CompressError;
use crate::detect::DetectError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Compress(#[from] CompressError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Detect(DetectError::Configuration(_))
            | ApiError::Detect(DetectError::MalformedInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Detect(DetectError::DeadlineExceeded(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Detect(DetectError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Compress(CompressError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Compress(_) => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
