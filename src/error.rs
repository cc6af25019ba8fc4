//! Request-level error type; failures surface as bare status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Upload pipeline failures.
///
/// Responses never carry a body; detail stays in the log at the raising
/// site, identified by the file id where one exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiError {
    /// Malformed path under the store prefix, or an unusable file id.
    BadRequest,
    /// Unknown store or unknown file record.
    NotFound,
    /// Upload token did not validate.
    Forbidden,
    /// The per-file lock stayed held past the wait window.
    Conflict,
    /// Body stream or staging sink failure.
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.into_response()
    }
}
