pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod pages;
pub mod proxy;
pub mod session;

pub use config::Config;
pub use error::GatewayError;

use std::sync::Arc;

use auth::{AuthPipeline, Endpoints};
use proxy::ProxyGateway;
use session::SessionStore;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub gateway: ProxyGateway,
    pub endpoints: Endpoints,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        Self::with_endpoints(config, Endpoints::default())
    }

    /// Constructor taking an explicit endpoint set; tests substitute a mock
    /// platform.
    pub fn with_endpoints(config: Config, endpoints: Endpoints) -> Result<Self, GatewayError> {
        let sessions = SessionStore::new(&config.secret_key);
        let gateway = ProxyGateway::new(
            config.image_strategy,
            config.image_mirror_prefix.clone(),
            config.proxy.as_deref(),
        )?;
        Ok(AppState {
            config,
            sessions,
            gateway,
            endpoints,
        })
    }

    /// Build a fresh pipeline for one login attempt. Each attempt owns its
    /// cookie state; nothing is shared between runs.
    pub fn pipeline(&self) -> Result<AuthPipeline, GatewayError> {
        AuthPipeline::new(self.endpoints.clone(), self.config.proxy.as_deref())
    }
}

pub type SharedState = Arc<AppState>;
