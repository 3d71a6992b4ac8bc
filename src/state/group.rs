//! Snapshot of a group and its role mappings.

use std::collections::BTreeMap;

use crate::controller::error::Result;
use crate::crd::{KeycloakGroup, SecondaryResources};
use crate::keycloak::types::Group;
use crate::keycloak::{KeycloakApi, RoleHolder, RoleScope};
use crate::state::{ClientRoleMappings, RoleMappings, read_client_role_mappings};

#[derive(Clone, Debug, Default)]
pub struct GroupState {
    pub group: Option<Group>,
    pub realm_roles: RoleMappings,
    pub client_roles: BTreeMap<String, ClientRoleMappings>,
    pub secondary_resources: SecondaryResources,
}

impl GroupState {
    pub async fn read(group: &KeycloakGroup, realm: &str, api: &dyn KeycloakApi) -> Result<Self> {
        let desired = &group.spec.group;
        let mut state = GroupState {
            group: api.find_group(realm, &desired.name).await?,
            ..Default::default()
        };

        let Some(id) = state.group.as_ref().and_then(|g| g.id.clone()) else {
            return Ok(state);
        };

        let holder = RoleHolder::Group(id);
        state.realm_roles = RoleMappings::read(api, realm, &holder, &RoleScope::Realm).await?;
        state.client_roles =
            read_client_role_mappings(api, realm, &holder, desired.client_roles.keys()).await?;

        Ok(state)
    }
}
