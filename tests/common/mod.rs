#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::Duration as ChronoDuration;
use mcp_token_gateway::oauth::clients::RegisteredClient;
use mcp_token_gateway::{
    create_app, BasicFormRenderer, ClientRegistry, Config, CredentialValidator, MemoryFlowStore,
};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "mcp-client";
pub const REDIRECT_URI: &str = "https://client.example/callback";
pub const GOOD_KEY: &str = "key-0123456789abcdef0123";

pub fn test_config(upstream_url: &str) -> Config {
    Config {
        port: 0,
        upstream_permissions_url: format!("{}/permissions", upstream_url),
        upstream_timeout_secs: 5,
        credential_key_prefix: "key-".to_string(),
        flow_ttl_secs: 600,
        code_ttl_secs: 600,
        token_lifetime_secs: 3600,
        registered_clients: vec![RegisteredClient {
            client_id: CLIENT_ID.to_string(),
            redirect_uris: vec![REDIRECT_URI.to_string()],
        }],
    }
}

/// Build an app wired to a wiremock upstream, with overridable TTLs.
pub fn build_app(config: Config, flow_ttl: ChronoDuration, code_ttl: ChronoDuration) -> Router {
    let registry = ClientRegistry::new(config.registered_clients.clone());
    let store = MemoryFlowStore::new(registry.clone(), flow_ttl, code_ttl);
    let validator = Arc::new(
        CredentialValidator::new(
            config.upstream_permissions_url.clone(),
            config.credential_key_prefix.clone(),
            Duration::from_secs(config.upstream_timeout_secs),
        )
        .unwrap(),
    );
    create_app(
        Arc::new(store),
        registry,
        validator,
        Arc::new(BasicFormRenderer),
        Arc::new(config),
    )
}

/// Mount a permissions endpoint granting the given scope string.
pub async fn mock_upstream_granting(scopes: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/permissions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "scopes": scopes,
        })))
        .mount(&server)
        .await;
    server
}

pub fn authorize_uri(scope: &str) -> String {
    format!(
        "/oauth/authorize?response_type=code&client_id={}&redirect_uri={}&state=client-csrf&scope={}&code_challenge={}&code_challenge_method=S256",
        CLIENT_ID,
        urlencode(REDIRECT_URI),
        urlencode(scope),
        mcp_token_gateway::oauth::pkce::derive_challenge("test-verifier"),
    )
}

pub fn urlencode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_form(app: &Router, uri: &str, body: String) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Pull the hidden flow id out of the rendered credential form.
pub fn extract_flow_id(html: &str) -> String {
    let marker = r#"name="flow" value=""#;
    let start = html.find(marker).expect("form should carry a flow field") + marker.len();
    let end = html[start..].find('"').unwrap() + start;
    html[start..end].to_string()
}

/// Pull a query parameter out of a redirect Location header.
pub fn location_param(response: &Response<Body>, param: &str) -> Option<String> {
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let url = url::Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == param)
        .map(|(_, v)| v.into_owned())
}

/// Run the full authorize + submit steps, returning the minted code.
pub async fn authorize_and_get_code(app: &Router, scope: &str) -> String {
    let response = get(app, &authorize_uri(scope)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let flow_id = extract_flow_id(&body_string(response).await);

    let response = post_form(
        app,
        "/oauth/authorize",
        format!(
            "credential={}&flow={}&action=authorize",
            urlencode(GOOD_KEY),
            urlencode(&flow_id)
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    location_param(&response, "code").expect("redirect should carry a code")
}

pub fn token_request_body(code: &str, verifier: &str, redirect_uri: &str) -> String {
    format!(
        "grant_type=authorization_code&code={}&redirect_uri={}&client_id={}&code_verifier={}",
        urlencode(code),
        urlencode(redirect_uri),
        CLIENT_ID,
        urlencode(verifier),
    )
}
