//! API error types.

use crate::lifecycle::LifecycleError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ember_metadata::MetadataError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("core error: {0}")]
    Core(#[from] ember_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Lifecycle(e) => match e {
                LifecycleError::ProjectNotFound(_) => "project_not_found",
                LifecycleError::PrivateProject(_) => "private_project",
                LifecycleError::UnavailableRepoFile(_) => "unavailable_repo_file",
                LifecycleError::InstanceNotFound(_) => "instance_not_found",
                LifecycleError::PollTimeout(_) => "timeout",
                LifecycleError::Platform(_) => "upstream_error",
                LifecycleError::Metadata(_) => "metadata_error",
                LifecycleError::Core(_) => "bad_request",
                LifecycleError::Internal(_) => "internal_error",
            },
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Lifecycle(e) => match e {
                LifecycleError::ProjectNotFound(_) | LifecycleError::InstanceNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                LifecycleError::PrivateProject(_) => StatusCode::FORBIDDEN,
                LifecycleError::UnavailableRepoFile(_) | LifecycleError::Core(_) => {
                    StatusCode::BAD_REQUEST
                }
                LifecycleError::PollTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                LifecycleError::Platform(_) => StatusCode::BAD_GATEWAY,
                LifecycleError::Metadata(e) => metadata_status(e),
                LifecycleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => metadata_status(e),
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn metadata_status(e: &MetadataError) -> StatusCode {
    match e {
        MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
        MetadataError::InvalidUpdate(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
