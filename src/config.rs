use std::env;

use thiserror::Error;

use crate::oauth::clients::RegisteredClient;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to parse registered clients: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// Upstream permissions endpoint the submitted credential is checked
    /// against.
    pub upstream_permissions_url: String,

    /// Timeout for the upstream permissions call, seconds.
    pub upstream_timeout_secs: u64,

    /// Expected prefix of a well-formed upstream credential.
    pub credential_key_prefix: String,

    /// TTL for a pending authorization flow, seconds.
    pub flow_ttl_secs: i64,

    /// TTL for a minted authorization code, seconds. Kept short (≤ 10 min).
    pub code_ttl_secs: i64,

    /// Lifetime reported on minted access tokens, seconds.
    pub token_lifetime_secs: i64,

    /// Registered-client allowlist.
    pub registered_clients: Vec<RegisteredClient>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required: `UPSTREAM_PERMISSIONS_URL`, `REGISTERED_CLIENTS` (JSON array
    /// of `{"client_id": ..., "redirect_uris": [...]}`). Everything else has
    /// a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let upstream_permissions_url = env::var("UPSTREAM_PERMISSIONS_URL")
            .map_err(|_| ConfigError::MissingVar("UPSTREAM_PERMISSIONS_URL"))?;
        let _ = url::Url::parse(&upstream_permissions_url)?;

        let clients_json = env::var("REGISTERED_CLIENTS")
            .map_err(|_| ConfigError::MissingVar("REGISTERED_CLIENTS"))?;
        let registered_clients = Self::parse_clients(&clients_json)?;

        Ok(Config {
            port: parse_or("PORT", 8080)?,
            upstream_permissions_url,
            upstream_timeout_secs: parse_or("UPSTREAM_TIMEOUT_SECS", 10)?,
            credential_key_prefix: env::var("CREDENTIAL_KEY_PREFIX")
                .unwrap_or_else(|_| "key-".to_string()),
            flow_ttl_secs: parse_or("FLOW_TTL_SECS", 600)?,
            code_ttl_secs: parse_or("CODE_TTL_SECS", 600)?,
            token_lifetime_secs: parse_or("TOKEN_LIFETIME_SECS", 3600)?,
            registered_clients,
        })
    }

    /// Parse the registered-client allowlist from its JSON form.
    fn parse_clients(json: &str) -> Result<Vec<RegisteredClient>, ConfigError> {
        let clients: Vec<RegisteredClient> = serde_json::from_str(json)?;
        for client in &clients {
            if client.redirect_uris.is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "REGISTERED_CLIENTS",
                    reason: format!("client {} has no redirect_uris", client.client_id),
                });
            }
            for uri in &client.redirect_uris {
                let _ = url::Url::parse(uri)?;
            }
        }
        Ok(clients)
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
