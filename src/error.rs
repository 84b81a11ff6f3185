//! Request-level error taxonomy and its HTTP mapping.
//!
//! Every per-request failure ends up here and is converted into a
//! `{"error": <category>, "message": <reason>}` body. Messages are short and
//! never carry certificates, secrets or verifier internals; the detailed cause
//! is logged instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Required configuration is absent or malformed. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("SAMLResponse missing from request")]
    MissingSamlResponse,

    /// The verifier rejected the response. The payload is already sanitized.
    #[error("assertion validation failed: {0}")]
    AssertionValidation(String),

    #[error("assertion does not identify a subject")]
    IdentityMissing,

    #[error("subject not allowed: {0}")]
    SubjectNotAllowed(String),

    #[error("assertion validation timed out after {0:?}")]
    ValidationTimeout(Duration),

    #[error("token creation failed: {0}")]
    TokenCreationFailed(String),

    #[error("session store error: {0}")]
    SessionStore(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingSamlResponse => StatusCode::BAD_REQUEST,
            AuthError::IdentityMissing | AuthError::SubjectNotAllowed(_) => StatusCode::UNAUTHORIZED,
            AuthError::ValidationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AuthError::Configuration(_)
            | AuthError::AssertionValidation(_)
            | AuthError::TokenCreationFailed(_)
            | AuthError::SessionStore(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable category.
    pub fn category(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "configuration",
            AuthError::MissingSamlResponse => "missing_saml_response",
            AuthError::AssertionValidation(_) => "assertion_validation",
            AuthError::IdentityMissing => "identity_missing",
            AuthError::SubjectNotAllowed(_) => "subject_not_allowed",
            AuthError::ValidationTimeout(_) => "validation_timeout",
            AuthError::TokenCreationFailed(_) => "token_creation_failed",
            AuthError::SessionStore(_) => "session_store",
            AuthError::Internal(_) => "internal",
        }
    }

    /// Client-facing reason.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Configuration(_) => "Service is misconfigured".to_string(),
            AuthError::MissingSamlResponse => "SAML response not found in form data".to_string(),
            AuthError::AssertionValidation(reason) => format!("SAML processing failed: {}", reason),
            AuthError::IdentityMissing => {
                "User could not be authenticated through the SAML response".to_string()
            }
            AuthError::SubjectNotAllowed(_) => "User account not found in the application".to_string(),
            AuthError::ValidationTimeout(_) => "SAML response validation timed out".to_string(),
            AuthError::TokenCreationFailed(_) => "Could not issue access token".to_string(),
            AuthError::SessionStore(_) => "Session storage unavailable".to_string(),
            AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(category = self.category(), error = %self, "Request failed");
        } else {
            warn!(category = self.category(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: self.category(),
            message: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}
