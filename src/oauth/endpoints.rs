use axum::{
    extract::{Form, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use tracing::{info, warn};
use url::Url;

use super::error::FlowError;
use super::pkce;
use super::types::{
    AccessToken, AuthorizeParams, CreateFlowParams, CredentialSubmission, TokenRequest,
};
use crate::forms::{FormNotice, FormRequest};
use crate::http_server::AppState;
use crate::scopes::ScopeSet;
use crate::upstream::CredentialValidator;

/// Namespace prefix for minted bearer tokens.
const TOKEN_PREFIX: &str = "mtgt_";

/// Handle GET /oauth/authorize — start an authorization flow.
///
/// Validates the request, persists a pending flow, and hands off to the form
/// collaborator with the internal flow id as the hidden correlation field.
///
/// Validation failures here are terminal and rendered directly to the caller.
/// They are never redirected to the supplied `redirect_uri`: until that URI
/// is confirmed against the allowlist, redirecting to it is an open redirect.
pub async fn authorize_handler(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, FlowError> {
    info!(
        client_id = %params.client_id,
        redirect_uri = %params.redirect_uri,
        response_type = %params.response_type,
        scope = ?params.scope,
        "Starting authorization flow"
    );

    if params.response_type != "code" {
        warn!(response_type = %params.response_type, "Invalid response_type");
        return Err(FlowError::InvalidRequest(format!(
            "Unsupported response_type: {}. Only 'code' is supported.",
            params.response_type
        )));
    }

    let scope = ScopeSet::parse(params.scope.as_deref().unwrap_or(""));
    let flow_id = state
        .store
        .create(CreateFlowParams {
            client_id: params.client_id.clone(),
            redirect_uri: params.redirect_uri,
            scope: scope.clone(),
            client_state: params.state,
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
        })
        .await?;

    let html = state.forms.render_form(&FormRequest {
        flow_id,
        client_id: params.client_id,
        scope,
        notice: None,
    });
    Ok(Html(html).into_response())
}

/// Handle POST /oauth/authorize — credential-collection form submission.
///
/// Fields: `credential` (the upstream key), `flow` (hidden correlation id),
/// `action` ("authorize" or "cancel"). User-correctable failures re-render
/// the form without mutating the flow; only a confirmed credential with
/// sufficient permissions moves the flow to `Authorized`.
pub async fn submit_handler(
    State(state): State<AppState>,
    Form(submission): Form<CredentialSubmission>,
) -> Result<Response, FlowError> {
    let flow = match state.store.get(&submission.flow).await {
        Ok(flow) => flow,
        Err(FlowError::FlowNotFound) | Err(FlowError::FlowExpired) => {
            info!("Form submitted for missing or expired flow");
            return Ok((StatusCode::GONE, Html(state.forms.render_expired())).into_response());
        }
        Err(e) => return Err(e),
    };

    if flow.status != super::types::FlowStatus::Pending {
        // Already authorized or consumed; a stale resubmission gets the
        // restart page rather than a second code.
        return Ok((StatusCode::GONE, Html(state.forms.render_expired())).into_response());
    }

    match submission.action.as_str() {
        "cancel" => {
            info!(client_id = %flow.client_id, "User cancelled authorization");
            let mut url = redirect_url(&flow.redirect_uri)?;
            url.query_pairs_mut().append_pair("error", "access_denied");
            if let Some(client_state) = &flow.client_state {
                url.query_pairs_mut().append_pair("state", client_state);
            }
            Ok(found(url))
        }
        "authorize" => {
            if let Err(err) = confirm_credential(&state, &submission.credential, &flow.scope).await
            {
                return match user_notice(err) {
                    Ok(notice) => Ok(rerender(&state, &flow, notice)),
                    Err(err) => Err(err),
                };
            }

            // Token scope is what the client asked for, not everything the
            // upstream credential happens to grant.
            let code = state
                .store
                .mark_authorized(&flow.state_id, flow.scope.clone())
                .await?;

            let mut url = redirect_url(&flow.redirect_uri)?;
            url.query_pairs_mut().append_pair("code", &code.code);
            if let Some(client_state) = &flow.client_state {
                url.query_pairs_mut().append_pair("state", client_state);
            }
            info!(client_id = %flow.client_id, "Redirecting with authorization code");
            Ok(found(url))
        }
        other => Err(FlowError::InvalidRequest(format!(
            "Unknown form action: {}",
            other
        ))),
    }
}

/// Handle POST /oauth/token — exchange a code + verifier for an access token.
///
/// The code is consumed before any further check, so a failed exchange still
/// burns it; a caller cannot retry verifier guesses against one code.
pub async fn token_handler(
    State(state): State<AppState>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<AccessToken>, FlowError> {
    info!(
        grant_type = %request.grant_type,
        client_id = %request.client_id,
        "Token endpoint called"
    );

    if request.grant_type != "authorization_code" {
        return Err(FlowError::InvalidRequest(format!(
            "Unsupported grant_type: {}",
            request.grant_type
        )));
    }
    if !state.registry.contains(&request.client_id) {
        warn!(client_id = %request.client_id, "Token request from unknown client");
        return Err(FlowError::UnknownClient);
    }

    let grant = state.store.consume_code(&request.code).await?;

    // Exact string equality against what was recorded at authorization time.
    // Mismatches are never corrected, and the error does not say which
    // parameter differed.
    if grant.flow.redirect_uri != request.redirect_uri {
        warn!("redirect_uri mismatch on token exchange");
        return Err(FlowError::GrantMismatch);
    }
    if grant.flow.client_id != request.client_id {
        warn!("client_id mismatch on token exchange");
        return Err(FlowError::GrantMismatch);
    }

    if !pkce::verify_challenge(&request.code_verifier, &grant.flow.code_challenge) {
        warn!("PKCE verification failed on token exchange");
        return Err(FlowError::PkceMismatch);
    }

    let token = mint_access_token(&grant.granted_scopes, state.config.token_lifetime_secs);
    info!(
        client_id = %request.client_id,
        scope = %grant.granted_scopes,
        expires_in = token.expires_in,
        "Minted access token"
    );
    Ok(Json(token))
}

/// Validate the submitted credential and confirm it covers every requested
/// scope. The flow stays untouched on failure.
async fn confirm_credential(
    state: &AppState,
    credential: &str,
    required: &ScopeSet,
) -> Result<(), FlowError> {
    let check = state.validator.validate(credential).await?;
    CredentialValidator::check_required(&check.scopes, required)
        .map_err(|missing| FlowError::PermissionDenied { missing })?;
    Ok(())
}

/// Split user-correctable failures, which re-render the form, from terminal
/// ones. A bad key and a permission shortfall get distinct notices.
fn user_notice(err: FlowError) -> Result<FormNotice, FlowError> {
    match err {
        FlowError::CredentialInvalid(reason) => Ok(FormNotice::CredentialRejected(reason)),
        FlowError::PermissionDenied { missing } => {
            info!(missing = %missing, "Credential lacks requested permissions");
            Ok(FormNotice::PermissionShortfall(missing))
        }
        FlowError::UpstreamUnavailable(_) => Ok(FormNotice::UpstreamUnavailable),
        other => Err(other),
    }
}

/// Mint an opaque bearer token scoped to the granted permission set.
fn mint_access_token(granted_scopes: &ScopeSet, lifetime_secs: i64) -> AccessToken {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    AccessToken {
        access_token: format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(bytes)),
        token_type: "bearer".to_string(),
        scope: granted_scopes.to_string(),
        expires_in: lifetime_secs,
    }
}

/// Parse a stored redirect URI. The store only persists allowlisted absolute
/// URIs, so a parse failure here is a server-side invariant break.
fn redirect_url(redirect_uri: &str) -> Result<Url, FlowError> {
    Url::parse(redirect_uri)
        .map_err(|e| FlowError::InvalidRequest(format!("stored redirect_uri invalid: {}", e)))
}

fn found(url: Url) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

fn rerender(state: &AppState, flow: &super::types::FlowState, notice: FormNotice) -> Response {
    let html = state.forms.render_form(&FormRequest {
        flow_id: flow.state_id.clone(),
        client_id: flow.client_id.clone(),
        scope: flow.scope.clone(),
        notice: Some(notice),
    });
    Html(html).into_response()
}
