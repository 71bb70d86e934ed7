use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt::Display;

use crate::series::PipelineError;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<AppError> for (StatusCode, String) {
    fn from(err: AppError) -> Self {
        (err.status, err.message)
    }
}

pub fn internal_error(err: impl Display) -> (StatusCode, String) {
    tracing::error!(error = %err, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Pipeline failures are caller errors (bad range, bad target, wrong selection); none of them
/// leave partial output behind.
pub fn map_pipeline_error(err: PipelineError) -> (StatusCode, String) {
    let status = match &err {
        PipelineError::InvalidRange { .. } => return internal_error(err),
        PipelineError::TooManyIntervals { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::ZeroTargetPoints | PipelineError::MultipleDevices { .. } => {
            StatusCode::BAD_REQUEST
        }
    };
    tracing::warn!(error = %err, status = %status, "series pipeline rejected request");
    (status, err.to_string())
}
