//! Server version migrations.
//!
//! Keycloak migrates its database schema on start. Two versions must never
//! run against the same database, so when the running image differs from the
//! desired one the `Recreate` strategy throttles the StatefulSet update to a
//! single replica. The next cycles, once the image matches, scale it back to
//! the requested instance count. Optionally a backup is taken first.
//!
//! Migration is a pure rewrite of an action list.

use tracing::{info, warn};

use crate::action::{ClusterAction, DesiredClusterState};
use crate::config::Images;
use crate::controller::error::{Error, Result};
use crate::crd::{Keycloak, MigrationStrategy};
use crate::resources::backup::generate_migration_backup;
use crate::resources::common::KEYCLOAK_SERVICE_NAME;
use crate::resources::statefulset::set_replicas;
use crate::state::ClusterState;
use crate::store::{Managed, ManagedResource};

/// Rewrites a server's action list when a version migration is in progress.
pub trait Migrator: Send + Sync {
    fn migrate(
        &self,
        keycloak: &Keycloak,
        state: &ClusterState,
        desired: DesiredClusterState,
    ) -> Result<DesiredClusterState>;
}

/// Migrator comparing the running image with the configured server image.
#[derive(Clone, Debug)]
pub struct DefaultMigrator {
    images: Images,
}

impl DefaultMigrator {
    pub fn new(images: Images) -> Self {
        Self { images }
    }

    /// Running image, when it differs from the desired one.
    fn migrating_from<'a>(&self, keycloak: &Keycloak, state: &'a ClusterState) -> Option<&'a str> {
        let running = state.running_image()?;
        let target = self.images.server_image(&keycloak.spec);
        if target.is_empty() {
            warn!("No server image configured, skipping migration check");
            return None;
        }
        (running != target).then_some(running)
    }
}

fn is_server_update(action: &ClusterAction) -> bool {
    matches!(
        action,
        ClusterAction::UpdateResource(ManagedResource::StatefulSet(sts))
            if sts.metadata.name.as_deref() == Some(KEYCLOAK_SERVICE_NAME)
    )
}

impl Migrator for DefaultMigrator {
    fn migrate(
        &self,
        keycloak: &Keycloak,
        state: &ClusterState,
        mut desired: DesiredClusterState,
    ) -> Result<DesiredClusterState> {
        let Some(from) = self.migrating_from(keycloak, state) else {
            return Ok(desired);
        };
        if keycloak.spec.migration.strategy != MigrationStrategy::Recreate {
            return Ok(desired);
        }

        let updates = desired.iter().filter(|a| is_server_update(a)).count();
        match updates {
            0 => return Ok(desired),
            1 => {}
            n => {
                return Err(Error::Permanent(format!(
                    "expected one server StatefulSet update, found {}",
                    n
                )));
            }
        }

        info!(
            from = %from,
            to = %self.images.server_image(&keycloak.spec),
            "Migrating server, scaling down to one replica"
        );
        for action in desired.iter_mut() {
            if let ClusterAction::UpdateResource(ManagedResource::StatefulSet(sts)) = action {
                if sts.metadata.name.as_deref() == Some(KEYCLOAK_SERVICE_NAME) {
                    set_replicas(sts, 1);
                }
            }
        }

        if keycloak.spec.migration.backups.enabled && state.migration_backup.is_none() {
            info!(from = %from, "Taking a backup before migration");
            desired.insert(
                0,
                ClusterAction::CreateResource(
                    generate_migration_backup(keycloak, from).into_managed(),
                ),
            );
        }

        Ok(desired)
    }
}
