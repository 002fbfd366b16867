//! Server-side storage for in-flight authorization flows and their codes.
//!
//! The store is the only shared mutable resource in the flow. Every state
//! transition (`mark_authorized`, `consume_code`) happens under one write
//! lock as a check-then-transition step, so two concurrent exchanges of the
//! same code can never both succeed. TTLs are enforced on every read; the
//! sweeper only reclaims memory and is never relied on for correctness.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::clients::ClientRegistry;
use super::error::FlowError;
use super::pkce::CHALLENGE_METHOD_S256;
use super::types::{AuthorizationCode, CreateFlowParams, FlowState, FlowStatus};
use crate::scopes::ScopeSet;

/// Prefix distinguishing the authorization-code namespace from flow state ids.
const CODE_PREFIX: &str = "mtgc_";

/// Snapshot returned by a successful code exchange.
#[derive(Debug, Clone)]
pub struct ConsumedGrant {
    pub flow: FlowState,
    pub granted_scopes: ScopeSet,
}

/// Durable keyed storage for authorization flows, with atomic
/// compare-and-transition semantics.
///
/// Injected into both endpoints; implementations must keep each transition
/// atomic with respect to concurrent callers.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Validate and persist a new `Pending` flow; returns its `state_id`.
    async fn create(&self, params: CreateFlowParams) -> Result<String, FlowError>;

    /// Fetch a flow by id, enforcing TTL.
    async fn get(&self, state_id: &str) -> Result<FlowState, FlowError>;

    /// Transition `Pending → Authorized` and mint a single-use code bound to
    /// the flow and the permission set the upstream check confirmed.
    async fn mark_authorized(
        &self,
        state_id: &str,
        granted_scopes: ScopeSet,
    ) -> Result<AuthorizationCode, FlowError>;

    /// Atomically invalidate a code and transition its flow to `Consumed`.
    ///
    /// Replay of an already-exchanged code fails with `CodeAlreadyUsed`;
    /// it never silently re-succeeds.
    async fn consume_code(&self, code: &str) -> Result<ConsumedGrant, FlowError>;

    /// Remove entries past their TTL. Reclamation only; returns the number
    /// of flow records removed.
    async fn sweep_expired(&self) -> usize;
}

struct StoreInner {
    flows: HashMap<String, FlowState>,
    /// Map: code value -> code record. Consumed codes are retained until
    /// swept so replay reports `CodeAlreadyUsed` rather than `CodeNotFound`.
    codes: HashMap<String, AuthorizationCode>,
}

/// In-memory `FlowStore` backed by a single `RwLock` over both maps.
#[derive(Clone)]
pub struct MemoryFlowStore {
    inner: Arc<RwLock<StoreInner>>,
    registry: ClientRegistry,
    flow_ttl: Duration,
    code_ttl: Duration,
}

impl MemoryFlowStore {
    pub fn new(registry: ClientRegistry, flow_ttl: Duration, code_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                flows: HashMap::new(),
                codes: HashMap::new(),
            })),
            registry,
            flow_ttl,
            code_ttl,
        }
    }

    /// Current (flows, codes) entry counts, for monitoring.
    pub async fn stats(&self) -> (usize, usize) {
        let inner = self.inner.read().await;
        (inner.flows.len(), inner.codes.len())
    }

    fn mint_code_value() -> String {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 32] = rng.gen();
        format!("{}{}", CODE_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn create(&self, params: CreateFlowParams) -> Result<String, FlowError> {
        if params.code_challenge_method != CHALLENGE_METHOD_S256 {
            return Err(FlowError::InvalidRequest(format!(
                "Unsupported code_challenge_method: {}. Only S256 is supported.",
                params.code_challenge_method
            )));
        }
        if params.code_challenge.is_empty() {
            return Err(FlowError::InvalidRequest(
                "code_challenge is required".to_string(),
            ));
        }
        if !self.registry.contains(&params.client_id) {
            return Err(FlowError::UnknownClient);
        }
        if !self
            .registry
            .redirect_allowed(&params.client_id, &params.redirect_uri)
        {
            return Err(FlowError::InvalidRequest(
                "redirect_uri is not registered for this client".to_string(),
            ));
        }

        let now = Utc::now();
        let state_id = super::pkce::generate_state();
        let flow = FlowState {
            state_id: state_id.clone(),
            client_id: params.client_id,
            redirect_uri: params.redirect_uri,
            scope: params.scope,
            client_state: params.client_state,
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
            created_at: now,
            expires_at: now + self.flow_ttl,
            status: FlowStatus::Pending,
        };

        let mut inner = self.inner.write().await;
        info!(
            client_id = %flow.client_id,
            expires_at = %flow.expires_at,
            "Created pending authorization flow"
        );
        inner.flows.insert(state_id.clone(), flow);
        Ok(state_id)
    }

    async fn get(&self, state_id: &str) -> Result<FlowState, FlowError> {
        let mut inner = self.inner.write().await;
        let flow = inner
            .flows
            .get_mut(state_id)
            .ok_or(FlowError::FlowNotFound)?;
        if flow.is_expired(Utc::now()) {
            if flow.status != FlowStatus::Consumed {
                flow.status = FlowStatus::Expired;
            }
            return Err(FlowError::FlowExpired);
        }
        Ok(flow.clone())
    }

    async fn mark_authorized(
        &self,
        state_id: &str,
        granted_scopes: ScopeSet,
    ) -> Result<AuthorizationCode, FlowError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let flow = inner
            .flows
            .get_mut(state_id)
            .ok_or(FlowError::FlowNotFound)?;
        if flow.is_expired(now) {
            flow.status = FlowStatus::Expired;
            return Err(FlowError::FlowExpired);
        }
        if flow.status != FlowStatus::Pending {
            warn!(status = ?flow.status, "Refusing to authorize non-pending flow");
            return Err(FlowError::InvalidFlowState);
        }

        flow.status = FlowStatus::Authorized;
        let code = AuthorizationCode {
            code: Self::mint_code_value(),
            state_id: state_id.to_string(),
            granted_scopes,
            expires_at: now + self.code_ttl,
            consumed: false,
        };
        // The sweeper reclaims flows by `expires_at`; a flow must stay
        // resolvable for as long as its code is live.
        if code.expires_at > flow.expires_at {
            flow.expires_at = code.expires_at;
        }
        info!(
            client_id = %flow.client_id,
            code_expires_at = %code.expires_at,
            "Flow authorized, minted single-use code"
        );
        inner.codes.insert(code.code.clone(), code.clone());
        Ok(code)
    }

    async fn consume_code(&self, code: &str) -> Result<ConsumedGrant, FlowError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        // Check-and-invalidate under one write lock: of two racing exchanges,
        // the second observes `consumed` and fails.
        let record = inner.codes.get_mut(code).ok_or(FlowError::CodeNotFound)?;
        if record.consumed {
            warn!(code_length = code.len(), "Replay of consumed authorization code");
            return Err(FlowError::CodeAlreadyUsed);
        }
        if now > record.expires_at {
            warn!(code_length = code.len(), "Authorization code expired");
            return Err(FlowError::CodeExpired);
        }
        record.consumed = true;
        let state_id = record.state_id.clone();
        let granted_scopes = record.granted_scopes.clone();

        let flow = inner
            .flows
            .get_mut(&state_id)
            .ok_or(FlowError::CodeNotFound)?;
        // Only `Authorized → Consumed`; `Expired` and `Consumed` are
        // terminal. The code stays burnt either way.
        match flow.status {
            FlowStatus::Authorized => flow.status = FlowStatus::Consumed,
            FlowStatus::Expired => return Err(FlowError::CodeExpired),
            FlowStatus::Pending | FlowStatus::Consumed => return Err(FlowError::CodeNotFound),
        }
        let snapshot = flow.clone();

        info!(client_id = %snapshot.client_id, "Authorization code consumed");
        Ok(ConsumedGrant {
            flow: snapshot,
            granted_scopes,
        })
    }

    async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let before = inner.flows.len();
        inner.flows.retain(|_, flow| now <= flow.expires_at);
        inner.codes.retain(|_, code| now <= code.expires_at);
        let removed = before - inner.flows.len();

        if removed > 0 {
            info!(
                removed = removed,
                remaining = inner.flows.len(),
                "Swept expired authorization flows"
            );
        }
        removed
    }
}

/// Start the periodic sweeper for expired flows and codes.
pub fn start_sweep_task(store: MemoryFlowStore) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            store.sweep_expired().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::clients::RegisteredClient;
    use crate::oauth::pkce;

    const REDIRECT: &str = "https://client.example/callback";

    fn test_store(flow_ttl_ms: i64, code_ttl_ms: i64) -> MemoryFlowStore {
        let registry = ClientRegistry::new(vec![RegisteredClient {
            client_id: "mcp-client".to_string(),
            redirect_uris: vec![REDIRECT.to_string()],
        }]);
        MemoryFlowStore::new(
            registry,
            Duration::milliseconds(flow_ttl_ms),
            Duration::milliseconds(code_ttl_ms),
        )
    }

    fn params() -> CreateFlowParams {
        CreateFlowParams {
            client_id: "mcp-client".to_string(),
            redirect_uri: REDIRECT.to_string(),
            scope: ScopeSet::parse("mcp:read"),
            client_state: Some("client-csrf".to_string()),
            code_challenge: pkce::derive_challenge("verifier"),
            code_challenge_method: "S256".to_string(),
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = test_store(60_000, 60_000);
        let state_id = store.create(params()).await.unwrap();

        let flow = store.get(&state_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Pending);
        assert_eq!(flow.client_state.as_deref(), Some("client-csrf"));

        let code = store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
            .unwrap();
        assert!(code.code.starts_with(CODE_PREFIX));
        assert_ne!(code.code, state_id);

        let grant = store.consume_code(&code.code).await.unwrap();
        assert_eq!(grant.flow.status, FlowStatus::Consumed);
        assert_eq!(grant.granted_scopes.to_string(), "mcp:read");
    }

    #[tokio::test]
    async fn test_code_single_use() {
        let store = test_store(60_000, 60_000);
        let state_id = store.create(params()).await.unwrap();
        let code = store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
            .unwrap();

        assert!(store.consume_code(&code.code).await.is_ok());
        match store.consume_code(&code.code).await {
            Err(FlowError::CodeAlreadyUsed) => {}
            other => panic!("expected CodeAlreadyUsed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let store = test_store(60_000, 60_000);
        match store.consume_code("mtgc_nope").await {
            Err(FlowError::CodeNotFound) => {}
            other => panic!("expected CodeNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_double_authorize_rejected() {
        let store = test_store(60_000, 60_000);
        let state_id = store.create(params()).await.unwrap();
        store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
            .unwrap();
        match store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
        {
            Err(FlowError::InvalidFlowState) => {}
            other => panic!("expected InvalidFlowState, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_expired_flow_cannot_authorize() {
        let store = test_store(10, 60_000);
        let state_id = store.create(params()).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;

        match store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
        {
            Err(FlowError::FlowExpired) => {}
            other => panic!("expected FlowExpired, got {:?}", other.map(|_| ())),
        }
        // TTL is also enforced on plain reads
        assert!(matches!(
            store.get(&state_id).await,
            Err(FlowError::FlowExpired)
        ));
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let store = test_store(60_000, 10);
        let state_id = store.create(params()).await.unwrap();
        let code = store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
            .unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;

        match store.consume_code(&code.code).await {
            Err(FlowError::CodeExpired) => {}
            other => panic!("expected CodeExpired, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_unregistered_redirect_rejected() {
        let store = test_store(60_000, 60_000);
        let mut p = params();
        p.redirect_uri = "https://evil.example/steal".to_string();
        assert!(matches!(
            store.create(p).await,
            Err(FlowError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_non_s256_method_rejected() {
        let store = test_store(60_000, 60_000);
        let mut p = params();
        p.code_challenge_method = "plain".to_string();
        assert!(matches!(
            store.create(p).await,
            Err(FlowError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_only() {
        let store = test_store(10, 10);
        store.create(params()).await.unwrap();

        let long_lived = test_store(60_000, 60_000);
        long_lived.create(params()).await.unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;
        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(long_lived.sweep_expired().await, 0);
        assert_eq!(store.stats().await, (0, 0));
    }

    #[tokio::test]
    async fn test_live_code_survives_flow_ttl_and_sweep() {
        // The flow's own TTL is shorter than the code's; exchange outcome
        // must not depend on whether a sweep ran in between.
        let store = test_store(10, 60_000);
        let state_id = store.create(params()).await.unwrap();
        let code = store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
            .unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;
        assert_eq!(store.sweep_expired().await, 0);

        // Still resolvable and still Authorized, not lazily expired
        let fetched = store.get(&state_id).await.unwrap();
        assert_eq!(fetched.status, FlowStatus::Authorized);

        let grant = store
            .consume_code(&code.code)
            .await
            .expect("unexpired code must exchange regardless of sweep timing");
        assert_eq!(grant.flow.status, FlowStatus::Consumed);
    }

    #[tokio::test]
    async fn test_replay_after_expiry_stays_already_used() {
        // A consumed flow never re-enters Expired; late replay of its code
        // reports the replay, not a fresh expiry.
        let store = test_store(10, 40);
        let state_id = store.create(params()).await.unwrap();
        let code = store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
            .unwrap();
        store.consume_code(&code.code).await.unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(60)).await;
        match store.consume_code(&code.code).await {
            Err(FlowError::CodeAlreadyUsed) => {}
            other => panic!("expected CodeAlreadyUsed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_concurrent_exchange_single_winner() {
        let store = test_store(60_000, 60_000);
        let state_id = store.create(params()).await.unwrap();
        let code = store
            .mark_authorized(&state_id, ScopeSet::parse("mcp:read"))
            .await
            .unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let c1 = code.code.clone();
        let c2 = code.code.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { s1.consume_code(&c1).await }),
            tokio::spawn(async move { s2.consume_code(&c2).await }),
        );

        let outcomes = [r1.unwrap(), r2.unwrap()];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one exchange must win");
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(FlowError::CodeAlreadyUsed))));
    }
}
