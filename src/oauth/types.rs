use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scopes::ScopeSet;

/// Lifecycle of an in-flight authorization request.
///
/// Transitions are monotonic: `Pending → Authorized → Consumed`, or
/// `Pending | Authorized → Expired`. Nothing leaves `Consumed` or `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Pending,
    Authorized,
    Consumed,
    Expired,
}

/// Server-side record of one in-flight authorization request.
///
/// Keyed by `state_id`, an unguessable random token generated server-side.
/// `client_state` is the caller's opaque CSRF correlation value — a separate
/// namespace, stored only to be echoed back verbatim, never used as a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    pub state_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: ScopeSet,
    pub client_state: Option<String>,

    /// S256 challenge bound at creation; immutable for the flow's lifetime.
    pub code_challenge: String,
    pub code_challenge_method: String,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: FlowStatus,
}

impl FlowState {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Parameters for creating a new flow record.
#[derive(Debug, Clone)]
pub struct CreateFlowParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: ScopeSet,
    pub client_state: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// Single-use authorization code minted when a flow becomes `Authorized`.
///
/// Lives in a namespace distinct from flow state ids; holds the permission
/// set actually confirmed by the upstream check, which the minted access
/// token will be scoped to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub state_id: String,
    pub granted_scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

/// Access token returned to the client (RFC 6749 section 5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_in: i64,
}

/// Query parameters for GET /oauth/authorize (RFC 6749 section 4.1.1).
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    /// Must be "code".
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,

    /// Caller's opaque CSRF value, echoed back on the final redirect.
    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,

    pub code_challenge: String,

    /// Must be "S256".
    pub code_challenge_method: String,
}

/// Form fields posted by the credential-collection page.
#[derive(Debug, Deserialize)]
pub struct CredentialSubmission {
    /// The upstream API credential. Never logged or persisted.
    pub credential: String,

    /// Hidden correlation field carrying the internal flow id.
    pub flow: String,

    /// "authorize" or "cancel".
    pub action: String,
}

/// Form-encoded body of POST /oauth/token (RFC 6749 section 4.1.3).
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Must be "authorization_code".
    pub grant_type: String,
    pub code: String,

    /// Must match the redirect_uri recorded at authorization time exactly.
    pub redirect_uri: String,
    pub client_id: String,
    pub code_verifier: String,
}
