//! Shared context for the controllers.
//!
//! The Context struct holds everything a reconcile cycle needs beyond the
//! object itself: the Kubernetes client and resource store, the capability
//! cache, the admin API client factory, the migrator and the event recorder.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::capability::CapabilityCache;
use crate::config::OperatorConfig;
use crate::health::HealthState;
use crate::keycloak::KeycloakClientFactory;
use crate::migrate::{DefaultMigrator, Migrator};
use crate::store::{KubeStore, ResourceStore};

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "keycloak-operator";

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Typed access to the resources the operator manages
    pub store: Arc<dyn ResourceStore>,
    /// Optional kinds confirmed by the capability detector
    pub capabilities: Arc<CapabilityCache>,
    /// Builds authenticated admin API clients
    pub keycloak_clients: KeycloakClientFactory,
    /// Rewrites server actions during version migrations
    pub migrator: Arc<dyn Migrator>,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        config: OperatorConfig,
        capabilities: Arc<CapabilityCache>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client.clone()));
        let keycloak_clients =
            KeycloakClientFactory::new(store.clone(), config.keycloak_api_timeout());
        let migrator = Arc::new(DefaultMigrator::new(config.images.clone()));
        Self {
            client,
            store,
            capabilities,
            keycloak_clients,
            migrator,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            config,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish<K>(
        &self,
        resource: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let object_ref = resource.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }

    /// Record a finished reconcile in the operator metrics.
    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, started: std::time::Instant) {
        if let Some(health) = &self.health_state {
            health.metrics.record_reconcile(
                kind,
                namespace,
                name,
                started.elapsed().as_secs_f64(),
            );
        }
    }

    /// Record a failed reconcile in the operator metrics.
    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        if let Some(health) = &self.health_state {
            health.metrics.record_error(kind, namespace, name);
        }
    }
}
