use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use mcp_token_gateway::oauth::store::start_sweep_task;
use mcp_token_gateway::{
    create_app, run_server, BasicFormRenderer, ClientRegistry, Config, CredentialValidator,
    MemoryFlowStore,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcp_token_gateway=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();

    info!("Starting MCP token gateway");

    let config = Arc::new(Config::from_env()?);
    let registry = ClientRegistry::new(config.registered_clients.clone());

    let store = MemoryFlowStore::new(
        registry.clone(),
        ChronoDuration::seconds(config.flow_ttl_secs),
        ChronoDuration::seconds(config.code_ttl_secs),
    );
    start_sweep_task(store.clone());

    let validator = Arc::new(CredentialValidator::new(
        config.upstream_permissions_url.clone(),
        config.credential_key_prefix.clone(),
        Duration::from_secs(config.upstream_timeout_secs),
    )?);

    let app = create_app(
        Arc::new(store),
        registry,
        validator,
        Arc::new(BasicFormRenderer),
        config.clone(),
    );

    run_server(app, config.port).await?;
    Ok(())
}
