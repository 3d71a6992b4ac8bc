//! Reconciliation of KeycloakRealm resources.
//!
//! A realm is applied to every server its instance selector matches.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::action::ClusterActionRunner;
use crate::controller::common::{admin_client, select_keycloaks};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::resource_controller::{ManagedCustomResource, require_targets};
use crate::crd::{KeycloakRealm, ResourceStatus, SecondaryResources};
use crate::reconcile::RealmReconciler;
use crate::state::RealmState;

#[async_trait]
impl ManagedCustomResource for KeycloakRealm {
    const KIND: &'static str = "KeycloakRealm";
    const FINALIZED: bool = true;

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context) -> Result<SecondaryResources> {
        let namespace = self.namespace().unwrap_or_default();
        let keycloaks = require_targets(
            select_keycloaks(&ctx.client, &namespace, &self.spec.instance_selector).await?,
            self.metadata.deletion_timestamp.is_some(),
            "Keycloak instances",
        )?;

        let mut ledger = SecondaryResources::new();
        for keycloak in &keycloaks {
            debug!(realm = %self.realm_name(), keycloak = %keycloak.name_any(), "Applying realm");
            let api = admin_client(ctx, keycloak).await?;
            let state = RealmState::read(self, api.as_ref(), ctx.store.as_ref()).await?;
            let desired = RealmReconciler::new(self, &state).reconcile();

            ClusterActionRunner::new(ctx.store.clone())
                .with_keycloak(api)
                .with_health(ctx.health_state.clone())
                .run_all(&desired)
                .await?;
            ledger.merge(&state.secondary_resources);
        }
        Ok(ledger)
    }
}
