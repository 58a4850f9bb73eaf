use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tower::BoxError;

/// The error type for floodgate.
///
/// Rate-limit rejections are not errors; the middleware resolves them into
/// responses locally. These variants are configuration defects and limiter
/// faults, and they surface loudly: at startup when detected during
/// [`build`](crate::AdmissionConfigBuilder::build), or as a server error
/// when only detectable per request.
#[derive(Debug, thiserror::Error)]
pub enum FloodgateError {
    /// An endpoint requires a policy that was never registered.
    ///
    /// This is a setup defect, not a rate-limit rejection; the request fails
    /// with a server error rather than being silently allowed or denied.
    #[error("this endpoint requires a rate limiting policy named {0:?}, but no such policy exists")]
    UnknownPolicy(String),

    #[error("a rate limiting policy named {0:?} is already registered")]
    DuplicatePolicy(String),

    #[error("policy name must not be empty")]
    InvalidPolicyName,

    #[error("rate limit metadata is already registered for route {0:?}")]
    DuplicateRoute(String),

    /// An external limiter failed during acquire or wait.
    #[error("limiter failure: {0}")]
    Limiter(#[source] BoxError),
}

impl FloodgateError {
    fn kind(&self) -> &'static str {
        match self {
            Self::UnknownPolicy(_)
            | Self::DuplicatePolicy(_)
            | Self::InvalidPolicyName
            | Self::DuplicateRoute(_) => "configuration_error",
            Self::Limiter(_) => "limiter_error",
        }
    }
}

/// Error response format for faults.
///
/// Shares the `error`/`message` shape with the rejection body so clients can
/// parse both the same way; the status code tells them apart.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for FloodgateError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: self.kind(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Convenience result type for floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_faults_map_to_server_errors() {
        let response = FloodgateError::UnknownPolicy("ghost".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_messages_name_the_policy() {
        let err = FloodgateError::DuplicatePolicy("api".to_string());
        assert!(err.to_string().contains("api"));
    }
}
