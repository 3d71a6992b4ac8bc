//! Reconciliation of KeycloakBackup resources.
//!
//! Backups only touch the resource store. Their Jobs, CronJobs and volumes
//! carry owner references and go away with the backup.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::action::ClusterActionRunner;
use crate::controller::common::select_keycloaks;
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::resource_controller::{ManagedCustomResource, require_targets};
use crate::crd::{KeycloakBackup, ResourceStatus, SecondaryResources};
use crate::reconcile::BackupReconciler;
use crate::state::BackupState;

#[async_trait]
impl ManagedCustomResource for KeycloakBackup {
    const KIND: &'static str = "KeycloakBackup";
    const FINALIZED: bool = false;

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context) -> Result<SecondaryResources> {
        let namespace = self.namespace().unwrap_or_default();
        // The database to dump is found by service name; the selector only
        // has to confirm there is a server to back up. Migration backups are
        // owned by their server and need no lookup.
        let owned = self.owner_references().iter().any(|o| o.kind == "Keycloak");
        if !owned {
            require_targets(
                select_keycloaks(&ctx.client, &namespace, &self.spec.instance_selector).await?,
                false,
                "Keycloak instances",
            )?;
        }

        let state = BackupState::read(self, ctx.store.as_ref()).await?;
        let desired = BackupReconciler::new(&ctx.config.images).reconcile(self, &state);
        debug!(name = %self.name_any(), actions = desired.len(), "Running backup actions");

        ClusterActionRunner::new(ctx.store.clone())
            .with_health(ctx.health_state.clone())
            .run_all(&desired)
            .await?;
        Ok(state.secondary_resources)
    }
}
