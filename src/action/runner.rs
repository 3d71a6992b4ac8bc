//! Sequential executor for [`DesiredClusterState`].

use std::sync::Arc;

use tracing::{error, info};

use super::DesiredClusterState;
use crate::controller::error::{Error, Result};
use crate::health::HealthState;
use crate::keycloak::KeycloakApi;
use crate::store::ResourceStore;

/// Runs actions against the resource store and, when bound, the admin API.
#[derive(Clone)]
pub struct ClusterActionRunner {
    store: Arc<dyn ResourceStore>,
    keycloak: Option<Arc<dyn KeycloakApi>>,
    health: Option<Arc<HealthState>>,
}

impl ClusterActionRunner {
    /// Runner with only the resource store, used for server topology and backups.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            keycloak: None,
            health: None,
        }
    }

    /// Bind an authenticated admin API client.
    pub fn with_keycloak(mut self, keycloak: Arc<dyn KeycloakApi>) -> Self {
        self.keycloak = Some(keycloak);
        self
    }

    /// Record per-action outcomes in the operator metrics.
    pub fn with_health(mut self, health: Option<Arc<HealthState>>) -> Self {
        self.health = health;
        self
    }

    pub fn store(&self) -> &dyn ResourceStore {
        self.store.as_ref()
    }

    /// The admin API client. Errors when the runner has none.
    pub fn keycloak(&self) -> Result<&dyn KeycloakApi> {
        self.keycloak.as_deref().ok_or_else(|| {
            Error::Configuration("action requires the Keycloak admin API".to_string())
        })
    }

    /// Run every action in order, stopping at the first failure.
    ///
    /// Nothing is rolled back and nothing is retried: the next reconcile
    /// starts again from freshly observed state.
    pub async fn run_all(&self, desired: &DesiredClusterState) -> Result<()> {
        for (index, action) in desired.iter().enumerate() {
            match action.run(self).await {
                Ok(message) => {
                    info!(index, status = "SUCCESS", action = action.name(), "{}", message);
                    self.record(action.name(), true);
                }
                Err(e) => {
                    error!(
                        index,
                        status = "FAILED",
                        action = action.name(),
                        error = %e,
                        "{}",
                        action.description()
                    );
                    self.record(action.name(), false);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn record(&self, action: &str, success: bool) {
        if let Some(health) = &self.health {
            health.metrics.record_action(action, success);
        }
    }
}
