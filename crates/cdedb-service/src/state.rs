//! Application state.

use std::sync::Arc;

use cdedb_backend::{Backend, BackendError};
use cdedb_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// All business capabilities over the configured store.
    pub backend: Backend,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the organisation settings are
    /// inconsistent.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, BackendError> {
        let backend = Backend::new(store, config.cde.clone())?;

        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not set - all /v1 requests will be rejected");
        }

        Ok(Self { backend, config })
    }
}
