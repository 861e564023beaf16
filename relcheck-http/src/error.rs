//! Error handling for relcheck-http
//!
//! Maps dispatch errors onto status codes. The body always carries the error
//! `kind`, which is what a forwarding peer uses to rebuild the original error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relcheck::config::ConfigError;
use relcheck::{DispatchError, ErrorKind};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned by every endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Human readable message
    pub error: String,

    /// Error category, e.g. `unresolved_relation`
    #[schema(value_type = String)]
    pub kind: ErrorKind,

    /// Message without the category prefix
    pub detail: String,
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Error from the dispatch pipeline
    Dispatch(DispatchError),

    /// Node configuration error
    Config(ConfigError),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl PartialEq<StatusCode> for AppError {
    fn eq(&self, status_code: &StatusCode) -> bool {
        let (error_status, _) = self.status_and_body();
        &error_status == status_code
    }
}

/// Status code used for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::UnresolvedRelation | ErrorKind::MaxDepthExceeded => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            Self::Dispatch(err) => (
                status_for(err.kind()),
                ErrorBody {
                    error: err.to_string(),
                    kind: err.kind(),
                    detail: err.detail().to_string(),
                },
            ),
            Self::Config(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: err.to_string(),
                    kind: ErrorKind::Internal,
                    detail: err.to_string(),
                },
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            tracing::error!(kind = %body.kind, "{}", body.error);
        }
        (status, Json(body)).into_response()
    }
}
