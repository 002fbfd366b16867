use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::scopes::ScopeSet;

/// Errors raised by the authorization and token endpoints and the flow store.
///
/// Variants that reach the token endpoint collapse onto the RFC 6749 error
/// codes in [`FlowError::oauth_error`]; the grant-failure variants share one
/// wire description so a caller cannot probe which check failed.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed or unregistered request parameters. Never redirected back to
    /// the caller-supplied URI.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `client_id` is not in the registered-client allowlist.
    #[error("unknown client")]
    UnknownClient,

    #[error("authorization flow not found")]
    FlowNotFound,

    #[error("authorization flow has expired")]
    FlowExpired,

    /// The flow exists but is not in the status the operation requires.
    #[error("authorization flow is not pending")]
    InvalidFlowState,

    /// The upstream credential is malformed or inactive. User-correctable.
    #[error("credential rejected: {0}")]
    CredentialInvalid(String),

    /// The credential is valid but does not grant every requested permission.
    #[error("credential lacks required permissions: {missing}")]
    PermissionDenied { missing: ScopeSet },

    #[error("authorization code not found")]
    CodeNotFound,

    #[error("authorization code has expired")]
    CodeExpired,

    /// Replay: the code was already exchanged once.
    #[error("authorization code already used")]
    CodeAlreadyUsed,

    /// The code verifier does not match the challenge bound at authorization.
    #[error("PKCE verification failed")]
    PkceMismatch,

    /// `redirect_uri` or `client_id` on the exchange differs from the flow.
    #[error("token request does not match authorization request")]
    GrantMismatch,

    /// Upstream permissions check timed out or returned a server error.
    /// Retryable, unlike a definitive `CredentialInvalid`.
    #[error("upstream credential service unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl FlowError {
    /// Map to an RFC 6749 error code, description, and HTTP status.
    ///
    /// All grant failures share one description; the specific cause is logged
    /// server-side only.
    pub fn oauth_error(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            FlowError::InvalidRequest(_)
            | FlowError::FlowNotFound
            | FlowError::FlowExpired
            | FlowError::InvalidFlowState => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "The request is missing a parameter or is otherwise malformed",
            ),
            FlowError::UnknownClient => (
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "Client authentication failed",
            ),
            FlowError::CodeNotFound
            | FlowError::CodeExpired
            | FlowError::CodeAlreadyUsed
            | FlowError::PkceMismatch
            | FlowError::GrantMismatch => (
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "The authorization grant is invalid, expired, or revoked",
            ),
            FlowError::CredentialInvalid(_) | FlowError::PermissionDenied { .. } => (
                StatusCode::BAD_REQUEST,
                "access_denied",
                "The resource owner denied the request",
            ),
            FlowError::UpstreamUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily_unavailable",
                "The authorization server is temporarily unable to handle the request",
            ),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::UpstreamUnavailable(_))
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let (status, error, description) = self.oauth_error();
        warn!(status = %status, error = error, detail = %self, "OAuth flow error");
        (
            status,
            Json(json!({
                "error": error,
                "error_description": description,
            })),
        )
            .into_response()
    }
}
