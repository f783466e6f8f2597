use crate::container::ContainerError;
use crate::http::response::ApiResponse;
use crate::validation::ValidationErrors;
use axum::{
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated, but not allowed to perform the action
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// No route matched the request path
    #[error("No route matches {path}")]
    RouteNotFound { path: String },

    /// A route matched the path but not the method
    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// CSRF token missing or not matching the cookie
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// Rate limit or concurrency limit exceeded
    #[error("Too many requests: {message}")]
    TooManyRequests { message: String, retry_after: Option<u64> },

    /// Request data failed validation
    #[error("The given data was invalid")]
    Validation(#[from] ValidationErrors),

    /// Conflict error, e.g. registering an email that already exists
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Service container resolution failure
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Template lookup or rendering failure
    #[error(transparent)]
    Template(#[from] minijinja::Error),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Marker attached to error responses so the error page layer can re-render them.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub status: StatusCode,
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } | Error::CsrfMismatch => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } | Error::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Container(_) | Error::Template(_) | Error::Internal { .. } | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine readable error code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "UNAUTHORIZED",
            Error::Forbidden { .. } => "FORBIDDEN",
            Error::BadRequest { .. } => "BAD_REQUEST",
            Error::NotFound { .. } | Error::RouteNotFound { .. } => "NOT_FOUND",
            Error::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Error::CsrfMismatch => "CSRF_TOKEN_MISMATCH",
            Error::TooManyRequests { .. } => "RATE_LIMIT_EXCEEDED",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Conflict { .. } => "CONFLICT",
            Error::Container(_) | Error::Template(_) | Error::Internal { .. } | Error::Other(_) => "SERVER_ERROR",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::RouteNotFound { .. } => "Not Found".to_string(),
            Error::MethodNotAllowed { .. } => "Method Not Allowed".to_string(),
            Error::CsrfMismatch => "CSRF token mismatch".to_string(),
            Error::TooManyRequests { message, .. } => message.clone(),
            Error::Validation(_) => "The given data was invalid.".to_string(),
            Error::Conflict { message } => message.clone(),
            Error::Container(_) | Error::Template(_) | Error::Internal { .. } | Error::Other(_) => {
                "An error occurred while processing your request".to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Container(_) | Error::Template(_) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::CsrfMismatch | Error::TooManyRequests { .. } => {
                tracing::warn!("Request rejected: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. }
            | Error::NotFound { .. }
            | Error::RouteNotFound { .. }
            | Error::MethodNotAllowed { .. }
            | Error::Validation(_)
            | Error::Conflict { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let message = self.user_message();

        let mut builder = ApiResponse::error(message.clone()).status(status).code(self.code());
        if let Error::Validation(errors) = &self {
            builder = builder.errors(errors.to_json());
        }

        let mut response = builder.into_response();
        if let Error::TooManyRequests {
            retry_after: Some(secs), ..
        } = &self
        {
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(*secs));
        }
        response.extensions_mut().insert(ErrorContext { status, message });
        response
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::CsrfMismatch.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::RouteNotFound { path: "/x".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Validation(ValidationErrors::default()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::Internal {
                operation: "read".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = Error::Internal {
            operation: "open /etc/secret".into(),
        };
        assert!(!err.user_message().contains("/etc/secret"));
    }

    #[tokio::test]
    async fn test_validation_error_body() {
        let mut map = BTreeMap::new();
        map.insert("email".to_string(), vec!["The email field is required.".to_string()]);
        let response = Error::Validation(ValidationErrors::from(map)).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.extensions().get::<ErrorContext>().is_some());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["errors"]["email"][0], "The email field is required.");
    }

    #[test]
    fn test_too_many_requests_sets_retry_after() {
        let response = Error::TooManyRequests {
            message: "slow down".into(),
            retry_after: Some(12),
        }
        .into_response();
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "12");
    }
}
