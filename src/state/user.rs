//! Snapshot of a user, its credential secret, groups and role mappings.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{KeycloakUser, SecondaryResources};
use crate::keycloak::types::{Group, User};
use crate::keycloak::{KeycloakApi, RoleHolder, RoleScope};
use crate::resources::secrets::user_secret_name;
use crate::state::{ClientRoleMappings, RoleMappings, read_client_role_mappings, record};
use crate::store::{ResourceStore, get_typed};

#[derive(Clone, Debug, Default)]
pub struct UserState {
    pub user: Option<User>,
    pub secret: Option<Secret>,
    /// Groups the user is a member of.
    pub groups: Vec<Group>,
    /// Every group in the realm, used to resolve desired group names.
    pub available_groups: Vec<Group>,
    pub realm_roles: RoleMappings,
    pub client_roles: BTreeMap<String, ClientRoleMappings>,
    pub secondary_resources: SecondaryResources,
}

impl UserState {
    pub async fn read(
        user: &KeycloakUser,
        realm: &str,
        api: &dyn KeycloakApi,
        store: &dyn ResourceStore,
    ) -> Result<Self> {
        let ns = user.namespace().unwrap_or_default();
        let desired = &user.spec.user;
        let mut state = UserState {
            user: api.find_user(realm, &desired.username).await?,
            secret: get_typed(store, &ns, &user_secret_name(realm, &desired.username, &ns)).await?,
            ..Default::default()
        };
        record(&mut state.secondary_resources, "Secret", state.secret.as_ref());

        let Some(id) = state.user.as_ref().and_then(|u| u.id.clone()) else {
            return Ok(state);
        };

        state.groups = api.list_user_groups(realm, &id).await?;
        if !desired.groups.is_empty() {
            state.available_groups = api.list_groups(realm).await?;
        }

        let holder = RoleHolder::User(id);
        state.realm_roles = RoleMappings::read(api, realm, &holder, &RoleScope::Realm).await?;
        state.client_roles =
            read_client_role_mappings(api, realm, &holder, desired.client_roles.keys()).await?;

        Ok(state)
    }
}
