//! Snapshot of everything that makes up one Keycloak server.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use kube::api::DynamicObject;
use tracing::debug;

use crate::capability::{
    CapabilityStore, CustomKind, GRAFANA_DASHBOARD, PROMETHEUS_RULE, ROUTE, SERVICE_MONITOR,
};
use crate::controller::error::Result;
use crate::crd::{Keycloak, KeycloakBackup, SecondaryResources};
use crate::keycloak::auth::admin_secret_name;
use crate::resources::backup::migration_backup_name;
use crate::resources::common::{
    DATABASE_SECRET_NAME, KEYCLOAK_DISCOVERY_SERVICE_NAME, KEYCLOAK_EXTERNAL_NAME,
    KEYCLOAK_SERVICE_NAME, POSTGRESQL_NAME, POSTGRESQL_PVC_NAME,
};
use crate::resources::statefulset::keycloak_image;
use crate::state::record;
use crate::store::{ResourceStore, get_custom, get_typed};

/// Observed objects of a Keycloak server.
#[derive(Clone, Debug, Default)]
pub struct ClusterState {
    pub admin_secret: Option<Secret>,
    pub database_secret: Option<Secret>,
    pub postgresql_pvc: Option<PersistentVolumeClaim>,
    pub postgresql_deployment: Option<Deployment>,
    pub postgresql_service: Option<Service>,
    pub postgresql_endpoints: Option<Endpoints>,
    pub keycloak_service: Option<Service>,
    pub discovery_service: Option<Service>,
    pub statefulset: Option<StatefulSet>,
    pub pod_disruption_budget: Option<PodDisruptionBudget>,
    pub ingress: Option<Ingress>,
    pub route: Option<DynamicObject>,
    pub service_monitor: Option<DynamicObject>,
    pub prometheus_rule: Option<DynamicObject>,
    pub grafana_dashboard: Option<DynamicObject>,
    /// Backup taken before migrating away from the running image.
    pub migration_backup: Option<KeycloakBackup>,
    pub secondary_resources: SecondaryResources,
}

impl ClusterState {
    /// Read the current state of a server.
    ///
    /// Servers the operator does not deploy only have their admin secret
    /// read. Optional kinds are read only once their capability is present.
    pub async fn read(
        keycloak: &Keycloak,
        store: &dyn ResourceStore,
        capabilities: &dyn CapabilityStore,
    ) -> Result<Self> {
        let ns = keycloak.namespace().unwrap_or_default();
        let mut state = ClusterState {
            admin_secret: get_typed(store, &ns, &admin_secret_name(&keycloak.name_any())).await?,
            ..Default::default()
        };

        if !keycloak.spec.manages_topology() {
            state.secondary_resources = state.ledger();
            return Ok(state);
        }

        state.database_secret = get_typed(store, &ns, DATABASE_SECRET_NAME).await?;
        if !keycloak.spec.external_database.enabled {
            state.postgresql_pvc = get_typed(store, &ns, POSTGRESQL_PVC_NAME).await?;
            state.postgresql_deployment = get_typed(store, &ns, POSTGRESQL_NAME).await?;
        } else {
            state.postgresql_endpoints = get_typed(store, &ns, POSTGRESQL_NAME).await?;
        }
        state.postgresql_service = get_typed(store, &ns, POSTGRESQL_NAME).await?;

        state.keycloak_service = get_typed(store, &ns, KEYCLOAK_SERVICE_NAME).await?;
        state.discovery_service = get_typed(store, &ns, KEYCLOAK_DISCOVERY_SERVICE_NAME).await?;
        state.statefulset = get_typed(store, &ns, KEYCLOAK_SERVICE_NAME).await?;

        if keycloak.spec.pod_disruption_budget.enabled {
            state.pod_disruption_budget = get_typed(store, &ns, KEYCLOAK_EXTERNAL_NAME).await?;
        }

        if keycloak.spec.external_access.enabled {
            if capabilities.is_present(ROUTE.key) {
                state.route = read_optional(store, capabilities, ROUTE, &ns).await?;
            } else {
                state.ingress = get_typed(store, &ns, KEYCLOAK_EXTERNAL_NAME).await?;
            }
        }

        if keycloak.spec.monitoring.enabled {
            state.service_monitor = read_optional(store, capabilities, SERVICE_MONITOR, &ns).await?;
            state.prometheus_rule = read_optional(store, capabilities, PROMETHEUS_RULE, &ns).await?;
            state.grafana_dashboard =
                read_optional(store, capabilities, GRAFANA_DASHBOARD, &ns).await?;
        }

        if keycloak.spec.migration.backups.enabled {
            if let Some(image) = state.running_image() {
                let name = migration_backup_name(keycloak, image);
                state.migration_backup = get_typed(store, &ns, &name).await?;
            }
        }

        state.secondary_resources = state.ledger();
        Ok(state)
    }

    /// Image of the running server container, if the StatefulSet exists.
    pub fn running_image(&self) -> Option<&str> {
        self.statefulset.as_ref().and_then(keycloak_image)
    }

    fn ledger(&self) -> SecondaryResources {
        let mut ledger = SecondaryResources::new();
        record(&mut ledger, "Secret", self.admin_secret.as_ref());
        record(&mut ledger, "Secret", self.database_secret.as_ref());
        record(&mut ledger, "PersistentVolumeClaim", self.postgresql_pvc.as_ref());
        record(&mut ledger, "Deployment", self.postgresql_deployment.as_ref());
        record(&mut ledger, "Service", self.postgresql_service.as_ref());
        record(&mut ledger, "Endpoints", self.postgresql_endpoints.as_ref());
        record(&mut ledger, "Service", self.keycloak_service.as_ref());
        record(&mut ledger, "Service", self.discovery_service.as_ref());
        record(&mut ledger, "StatefulSet", self.statefulset.as_ref());
        record(&mut ledger, "PodDisruptionBudget", self.pod_disruption_budget.as_ref());
        record(&mut ledger, "Ingress", self.ingress.as_ref());
        record(&mut ledger, ROUTE.kind, self.route.as_ref());
        record(&mut ledger, SERVICE_MONITOR.kind, self.service_monitor.as_ref());
        record(&mut ledger, PROMETHEUS_RULE.kind, self.prometheus_rule.as_ref());
        record(&mut ledger, GRAFANA_DASHBOARD.kind, self.grafana_dashboard.as_ref());
        record(&mut ledger, "KeycloakBackup", self.migration_backup.as_ref());
        ledger
    }
}

async fn read_optional(
    store: &dyn ResourceStore,
    capabilities: &dyn CapabilityStore,
    kind: CustomKind,
    namespace: &str,
) -> Result<Option<DynamicObject>> {
    if !capabilities.is_present(kind.key) {
        debug!(kind = kind.key, "Capability not present, skipping read");
        return Ok(None);
    }
    get_custom(store, kind, namespace, KEYCLOAK_EXTERNAL_NAME).await
}
