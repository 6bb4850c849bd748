//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::engine::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    engine: Engine,
}

impl AppState {
    pub fn new(config: Config, engine: Engine) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, engine }),
        }
    }

    /// Get the configuration the process started with
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the transfer registry
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }
}
