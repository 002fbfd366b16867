use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// A statically registered OAuth client and its exact allowed redirect URIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
}

/// Registered-client allowlist.
///
/// Loaded from configuration at startup; lookups only. Redirect URIs are
/// matched by exact string equality — no prefix or normalization tricks, since
/// any looseness here is an open-redirect vector.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, RegisteredClient>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<RegisteredClient>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.client_id.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, client_id: &str) -> Option<&RegisteredClient> {
        self.clients.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Whether `redirect_uri` is registered for `client_id` and usable:
    /// absolute, fragment-free, and an exact match against the allowlist.
    pub fn redirect_allowed(&self, client_id: &str, redirect_uri: &str) -> bool {
        let parsed = match Url::parse(redirect_uri) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Rejecting unparseable redirect_uri");
                return false;
            }
        };
        if parsed.fragment().is_some() {
            warn!("Rejecting redirect_uri with fragment");
            return false;
        }
        self.clients
            .get(client_id)
            .map(|c| c.redirect_uris.iter().any(|uri| uri == redirect_uri))
            .unwrap_or(false)
    }
}
