use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::forms::FormRenderer;
use crate::oauth::endpoints::{authorize_handler, submit_handler, token_handler};
use crate::oauth::store::FlowStore;
use crate::oauth::ClientRegistry;
use crate::upstream::CredentialValidator;

/// Shared application state, injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FlowStore>,
    pub registry: ClientRegistry,
    pub validator: Arc<CredentialValidator>,
    pub forms: Arc<dyn FormRenderer>,
    pub config: Arc<Config>,
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Create and configure the router.
pub fn create_app(
    store: Arc<dyn FlowStore>,
    registry: ClientRegistry,
    validator: Arc<CredentialValidator>,
    forms: Arc<dyn FormRenderer>,
    config: Arc<Config>,
) -> Router {
    let state = AppState {
        store,
        registry,
        validator,
        forms,
        config,
    };

    // The token endpoint is called server-to-server by arbitrary MCP
    // consumers; CORS stays permissive there.
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/oauth/authorize", get(authorize_handler).post(submit_handler))
        .route("/oauth/token", post(token_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn run_server(app: Router, port: u16) -> Result<(), std::io::Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Token gateway listening on {}", addr);
    axum::serve(listener, app).await
}
