//! OAuth 2.0 authorization-code + PKCE core.
//!
//! Flow: a client opens `/oauth/authorize`, the user supplies an upstream
//! API credential through the form collaborator, the upstream check gates
//! minting of a single-use code, and `/oauth/token` exchanges code +
//! verifier for a scoped bearer token.

pub mod clients;
pub mod endpoints;
pub mod error;
pub mod pkce;
pub mod store;
pub mod types;

pub use clients::{ClientRegistry, RegisteredClient};
pub use error::FlowError;
pub use store::{FlowStore, MemoryFlowStore};
pub use types::{AccessToken, AuthorizationCode, FlowState, FlowStatus};
