pub mod config;
pub mod forms;
pub mod http_server;
pub mod oauth;
pub mod scopes;
pub mod upstream;

pub use config::Config;
pub use forms::{BasicFormRenderer, FormRenderer};
pub use http_server::{create_app, run_server, AppState};
pub use oauth::{ClientRegistry, FlowError, FlowStore, MemoryFlowStore};
pub use scopes::ScopeSet;
pub use upstream::CredentialValidator;
