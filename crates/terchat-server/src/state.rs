use std::sync::Arc;

use terchat_store::Store;

use crate::config::ServerConfig;
use crate::registry::Registry;

/// Shared state handed to every session.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Registry,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Store, config: ServerConfig) -> Self {
        Self {
            store: Arc::new(store),
            registry: Registry::new(),
            config: Arc::new(config),
        }
    }
}
