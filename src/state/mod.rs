//! State readers.
//!
//! Each reader builds an immutable snapshot of what currently exists for one
//! custom resource. Absent objects are `None`; only unexpected errors abort a
//! read. Every object found is recorded in the snapshot's
//! [`SecondaryResources`] ledger, which the controller copies into status.

pub mod backup;
pub mod client;
pub mod cluster;
pub mod group;
pub mod realm;
pub mod user;

use std::collections::{BTreeMap, BTreeSet};

use kube::Resource;
use tracing::debug;

pub use backup::BackupState;
pub use client::ClientState;
pub use cluster::ClusterState;
pub use group::GroupState;
pub use realm::RealmState;
pub use user::UserState;

use crate::controller::error::Result;
use crate::crd::SecondaryResources;
use crate::keycloak::types::Role;
use crate::keycloak::{KeycloakApi, RoleHolder, RoleScope};

/// Roles currently mapped to a holder and the roles it could still be given.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoleMappings {
    pub assigned: Vec<Role>,
    pub available: Vec<Role>,
}

impl RoleMappings {
    pub async fn read(
        api: &dyn KeycloakApi,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
    ) -> Result<Self> {
        Ok(Self {
            assigned: api.list_assigned_roles(realm, holder, scope).await?,
            available: api.list_available_roles(realm, holder, scope).await?,
        })
    }
}

/// Role mappings of one client, keyed by the client's `clientId`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientRoleMappings {
    pub scope: RoleScope,
    pub mappings: RoleMappings,
}

/// Read client role mappings of a holder for each named client.
///
/// Clients that do not exist yet are left out; their roles are assigned
/// once a later cycle can see them.
pub async fn read_client_role_mappings<'a>(
    api: &dyn KeycloakApi,
    realm: &str,
    holder: &RoleHolder,
    client_ids: impl IntoIterator<Item = &'a String>,
) -> Result<BTreeMap<String, ClientRoleMappings>> {
    let mut result = BTreeMap::new();
    let client_ids: BTreeSet<&String> = client_ids.into_iter().collect();
    for client_id in client_ids {
        let Some(client) = api.find_client(realm, client_id).await? else {
            debug!(realm, client_id = %client_id, "Client not found, skipping its role mappings");
            continue;
        };
        let Some(id) = client.id else {
            continue;
        };
        let scope = RoleScope::Client {
            id,
            client_id: client_id.clone(),
        };
        let mappings = RoleMappings::read(api, realm, holder, &scope).await?;
        result.insert(client_id.clone(), ClientRoleMappings { scope, mappings });
    }
    Ok(result)
}

/// Record an observed object in a ledger.
pub(crate) fn record<K>(ledger: &mut SecondaryResources, kind: &str, object: Option<&K>)
where
    K: Resource,
{
    if let Some(name) = object.and_then(|o| o.meta().name.as_deref()) {
        ledger.add(kind, name);
    }
}
