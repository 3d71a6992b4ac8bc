//! Reconciliation of KeycloakGroup resources.
//!
//! Groups live entirely in the admin API; nothing is written to the
//! resource store.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::action::ClusterActionRunner;
use crate::controller::common::{admin_client, realm_targets};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::resource_controller::{ManagedCustomResource, require_targets};
use crate::crd::{KeycloakGroup, ResourceStatus, SecondaryResources};
use crate::reconcile::GroupReconciler;
use crate::state::GroupState;

#[async_trait]
impl ManagedCustomResource for KeycloakGroup {
    const KIND: &'static str = "KeycloakGroup";
    const FINALIZED: bool = true;

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context) -> Result<SecondaryResources> {
        let namespace = self.namespace().unwrap_or_default();
        let targets = require_targets(
            realm_targets(&ctx.client, &namespace, &self.spec.realm_selector).await?,
            self.metadata.deletion_timestamp.is_some(),
            "realms",
        )?;

        let mut ledger = SecondaryResources::new();
        for target in &targets {
            debug!(
                name = %self.name_any(),
                realm = %target.realm,
                keycloak = %target.keycloak.name_any(),
                "Applying group"
            );
            let api = admin_client(ctx, &target.keycloak).await?;
            let state = GroupState::read(self, &target.realm, api.as_ref()).await?;
            let desired = GroupReconciler::new(self, &state, &target.realm).reconcile();

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
