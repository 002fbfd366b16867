//! Validation of the upstream API credential a user submits through the
//! consent form. The raw credential is forwarded to the upstream permissions
//! endpoint and never logged or persisted here.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::oauth::error::FlowError;
use crate::scopes::ScopeSet;

/// Result of a successful upstream credential check.
#[derive(Debug, Clone)]
pub struct CredentialCheck {
    /// Permission set the credential actually grants.
    pub scopes: ScopeSet,
}

/// Wire shape of the upstream permissions endpoint response.
#[derive(Debug, Deserialize)]
struct UpstreamPermissionsResponse {
    /// Space-separated permission identifiers.
    scopes: String,
}

/// Checks a submitted credential against the upstream identity system.
pub struct CredentialValidator {
    http_client: Client,
    permissions_endpoint: String,
    /// Expected credential prefix (shape check before any network call).
    key_prefix: String,
}

/// Minimum plausible credential length after the prefix.
const MIN_KEY_BODY_LEN: usize = 16;

impl CredentialValidator {
    pub fn new(
        permissions_endpoint: String,
        key_prefix: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            permissions_endpoint,
            key_prefix,
        })
    }

    /// Validate a credential and return the permissions it grants.
    ///
    /// Malformed or rejected credentials are `CredentialInvalid` (the user
    /// can correct and resubmit); upstream timeouts and 5xx responses are
    /// `UpstreamUnavailable` (retryable, the credential verdict is unknown).
    pub async fn validate(&self, credential: &str) -> Result<CredentialCheck, FlowError> {
        let trimmed = credential.trim();
        if !trimmed.starts_with(&self.key_prefix)
            || trimmed.len() < self.key_prefix.len() + MIN_KEY_BODY_LEN
        {
            debug!(
                credential_length = trimmed.len(),
                "Credential failed shape check"
            );
            return Err(FlowError::CredentialInvalid(format!(
                "The credential does not look like a valid key (expected a \"{}\" prefix)",
                self.key_prefix
            )));
        }

        debug!(
            endpoint = %self.permissions_endpoint,
            "Calling upstream permissions endpoint"
        );

        let response = self
            .http_client
            .get(&self.permissions_endpoint)
            .bearer_auth(trimmed)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    error = %e,
                    endpoint = %self.permissions_endpoint,
                    "Upstream permissions call failed"
                );
                FlowError::UpstreamUnavailable(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            warn!(status = %status, "Upstream rejected credential");
            return Err(FlowError::CredentialInvalid(
                "The key was rejected by the upstream service. Check that it is active.".to_string(),
            ));
        }
        if !status.is_success() {
            warn!(status = %status, "Upstream permissions endpoint returned an error");
            return Err(FlowError::UpstreamUnavailable(format!(
                "upstream returned status {}",
                status
            )));
        }

        let body: UpstreamPermissionsResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse upstream permissions response");
            FlowError::UpstreamUnavailable(format!("unparseable response: {}", e))
        })?;

        let scopes = ScopeSet::parse(&body.scopes);
        debug!(granted = %scopes, "Upstream confirmed credential");
        Ok(CredentialCheck { scopes })
    }

    /// Pure set-difference check: does `granted` cover every scope in
    /// `required`? On shortfall, returns the missing scopes so the form can
    /// tell the user exactly which permissions the key still needs.
    pub fn check_required(granted: &ScopeSet, required: &ScopeSet) -> Result<(), ScopeSet> {
        let missing = ScopeSet::missing_from(required, granted);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}
