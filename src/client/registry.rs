//! Endpoint registry: one retrying executor per configured endpoint.
//!
//! Epistemic foundation:
//! - K_i: All endpoints are OpenAI-compatible
//! - K_i: Every model spec names an endpoint that exists (checked by `Config::validate`)
//! - I^R: User configures which endpoints and credentials to use

use crate::client::{ChatEndpoint, CredentialPool, Executor, LedgerStats, ModelEndpoint, RetryPolicy};
use crate::models::{Config, ConfigError, ModelSpec, PipelineError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of executors keyed by endpoint name.
///
/// Models sharing an endpoint share its credential pool and ledger.
///
/// # Example
///
/// ```ignore
/// use physrev::{Config, EndpointRegistry};
///
/// let config = Config::from_file("physrev.toml".as_ref())?;
/// let registry = EndpointRegistry::from_config(&config)?;
/// let executor = registry.for_model(&config.proposer.models[0])?;
/// ```
#[derive(Default)]
pub struct EndpointRegistry {
    executors: HashMap<String, Arc<Executor>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build executors for every endpoint referenced by a model.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoCredentials` if an endpoint requires a key
    /// but none resolves, and `ConfigError::EndpointNotFound` for a model
    /// that names an unknown endpoint.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let policy = RetryPolicy::from(&config.retry);
        let mut registry = Self::new();

        for name in config.referenced_endpoints() {
            let endpoint_config = config.endpoint(&name)?;
            let secrets = config.resolve_credentials(&name)?;
            let pool = CredentialPool::new(name.clone(), secrets)?;
            let endpoint = ChatEndpoint::new(name.clone(), endpoint_config)?;

            info!(
                endpoint = %name,
                base_url = %endpoint.base_url(),
                credentials = pool.len(),
                "Endpoint ready"
            );

            registry.insert(name, Executor::new(Arc::new(endpoint), pool, policy));
        }

        Ok(registry)
    }

    /// Register an executor under `name`.
    pub fn insert(&mut self, name: impl Into<String>, executor: Executor) {
        self.executors.insert(name.into(), Arc::new(executor));
    }

    /// Register a ready-made endpoint with its pool.
    pub fn insert_endpoint(
        &mut self,
        name: impl Into<String>,
        endpoint: Arc<dyn ModelEndpoint>,
        pool: CredentialPool,
        policy: RetryPolicy,
    ) {
        self.insert(name, Executor::new(endpoint, pool, policy));
    }

    /// Get executor by endpoint name.
    pub fn get(&self, name: &str) -> Option<&Arc<Executor>> {
        self.executors.get(name)
    }

    /// Executor serving `model`.
    pub fn for_model(&self, model: &ModelSpec) -> Result<Arc<Executor>, ConfigError> {
        self.get(&model.endpoint)
            .cloned()
            .ok_or_else(|| ConfigError::EndpointNotFound(model.endpoint.clone()))
    }

    /// Get all endpoint names, sorted.
    pub fn endpoint_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Ledger snapshot per endpoint, sorted by name.
    pub fn stats(&self) -> Vec<(String, LedgerStats)> {
        self.endpoint_names()
            .into_iter()
            .filter_map(|name| {
                self.executors
                    .get(name)
                    .map(|e| (name.to_string(), e.ledger().stats()))
            })
            .collect()
    }
}
