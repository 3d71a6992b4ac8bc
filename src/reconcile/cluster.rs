//! Keycloak server reconciler.
//!
//! Produces the Kubernetes objects that make up a server. Unlike the admin
//! API reconcilers there is no `Ping` and no delete path: every object is
//! owned by the Keycloak resource and garbage collected with it.

use std::net::IpAddr;

use kube::api::DynamicObject;
use tracing::debug;

use crate::action::{ClusterAction, DesiredClusterState};
use crate::capability::{
    CapabilityStore, CustomKind, GRAFANA_DASHBOARD, PROMETHEUS_RULE, ROUTE, SERVICE_MONITOR,
};
use crate::config::Images;
use crate::crd::Keycloak;
use crate::reconcile::{carry_version, create_or_update, create_or_update_custom};
use crate::resources::common::POSTGRESQL_PORT;
use crate::resources::secrets::{
    DATABASE_EXTERNAL_ADDRESS_KEY, DATABASE_EXTERNAL_PORT_KEY, generate_admin_secret,
    generate_database_secret, merge_secret, secret_string,
};
use crate::resources::{external_access, monitoring, pdb, postgresql, services, statefulset};
use crate::state::ClusterState;

pub struct ClusterReconciler<'a> {
    images: &'a Images,
    capabilities: &'a dyn CapabilityStore,
}

impl<'a> ClusterReconciler<'a> {
    pub fn new(images: &'a Images, capabilities: &'a dyn CapabilityStore) -> Self {
        Self {
            images,
            capabilities,
        }
    }

    pub fn reconcile(&self, keycloak: &Keycloak, state: &ClusterState) -> DesiredClusterState {
        let mut desired = DesiredClusterState::new();
        if !keycloak.spec.manages_topology() {
            return desired;
        }

        desired.push(create_or_update(
            state.admin_secret.as_ref(),
            generate_admin_secret(keycloak),
            merge_secret,
        ));

        if keycloak.spec.external_database.enabled {
            self.external_database(keycloak, state, &mut desired);
        } else {
            self.managed_database(keycloak, state, &mut desired);
        }

        desired.push(create_or_update(
            state.keycloak_service.as_ref(),
            services::generate_keycloak_service(keycloak),
            services::merge_service,
        ));
        desired.push(create_or_update(
            state.discovery_service.as_ref(),
            services::generate_discovery_service(keycloak),
            services::merge_service,
        ));

        if keycloak.spec.pod_disruption_budget.enabled {
            desired.push(create_or_update(
                state.pod_disruption_budget.as_ref(),
                pdb::generate_pod_disruption_budget(keycloak),
                carry_version,
            ));
        }

        desired.push(create_or_update(
            state.statefulset.as_ref(),
            statefulset::generate_statefulset(keycloak, self.images.server_image(&keycloak.spec)),
            statefulset::merge_statefulset,
        ));

        if keycloak.spec.external_access.enabled {
            if self.capabilities.is_present(ROUTE.key) {
                desired.push(create_or_update_custom(
                    ROUTE,
                    state.route.as_ref(),
                    external_access::generate_route(keycloak),
                    external_access::merge_route,
                ));
            } else {
                desired.push(create_or_update(
                    state.ingress.as_ref(),
                    external_access::generate_ingress(keycloak),
                    carry_version,
                ));
            }
        }

        if keycloak.spec.monitoring.enabled {
            self.monitoring(keycloak, state, &mut desired);
        }

        desired
    }

    fn managed_database(
        &self,
        keycloak: &Keycloak,
        state: &ClusterState,
        desired: &mut DesiredClusterState,
    ) {
        desired.push(create_or_update(
            state.database_secret.as_ref(),
            generate_database_secret(keycloak),
            merge_secret,
        ));
        desired.push(create_or_update(
            state.postgresql_pvc.as_ref(),
            postgresql::generate_pvc(keycloak),
            postgresql::merge_pvc,
        ));
        desired.push(create_or_update(
            state.postgresql_deployment.as_ref(),
            postgresql::generate_deployment(keycloak, &self.images.postgresql),
            carry_version,
        ));
        desired.push(create_or_update(
            state.postgresql_service.as_ref(),
            postgresql::generate_service(keycloak),
            services::merge_service,
        ));
    }

    /// The database secret of an external database is provided by the user;
    /// its address decides between Endpoints and an ExternalName Service.
    fn external_database(
        &self,
        keycloak: &Keycloak,
        state: &ClusterState,
        desired: &mut DesiredClusterState,
    ) {
        let Some(address) = state
            .database_secret
            .as_ref()
            .and_then(|s| secret_string(s, DATABASE_EXTERNAL_ADDRESS_KEY))
        else {
            debug!("External database address not known yet");
            return;
        };
        let port = state
            .database_secret
            .as_ref()
            .and_then(|s| secret_string(s, DATABASE_EXTERNAL_PORT_KEY))
            .and_then(|p| p.parse().ok())
            .unwrap_or(POSTGRESQL_PORT);

        if address.parse::<IpAddr>().is_ok() {
            desired.push(create_or_update(
                state.postgresql_service.as_ref(),
                postgresql::generate_external_service(keycloak),
                services::merge_service,
            ));
            desired.push(create_or_update(
                state.postgresql_endpoints.as_ref(),
                postgresql::generate_external_endpoints(keycloak, &address, port),
                carry_version,
            ));
        } else {
            desired.push(create_or_update(
                state.postgresql_service.as_ref(),
                postgresql::generate_external_name_service(keycloak, &address),
                carry_version,
            ));
        }
    }

    fn monitoring(&self, keycloak: &Keycloak, state: &ClusterState, desired: &mut DesiredClusterState) {
        let objects: [(CustomKind, Option<&DynamicObject>, fn(&Keycloak) -> DynamicObject); 3] = [
            (
                SERVICE_MONITOR,
                state.service_monitor.as_ref(),
                monitoring::generate_service_monitor,
            ),
            (
                PROMETHEUS_RULE,
                state.prometheus_rule.as_ref(),
                monitoring::generate_prometheus_rule,
            ),
            (
                GRAFANA_DASHBOARD,
                state.grafana_dashboard.as_ref(),
                monitoring::generate_grafana_dashboard,
            ),
        ];
        for (kind, observed, generate) in objects {
            if !self.gated(kind) {
                continue;
            }
            desired.push(create_or_update_custom(
                kind,
                observed,
                generate(keycloak),
                monitoring::merge_custom,
            ));
        }
    }

    fn gated(&self, kind: CustomKind) -> bool {
        let present = self.capabilities.is_present(kind.key);
        if !present {
            debug!(kind = kind.key, "Capability not present, skipping");
        }
        present
    }
}
