//! Snapshot of a client, its roles, scopes and service account.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{KeycloakClient, SecondaryResources};
use crate::keycloak::types::{Client, ClientScope, Role, User};
use crate::keycloak::{KeycloakApi, RoleHolder, RoleScope};
use crate::resources::secrets::client_secret_name;
use crate::state::{ClientRoleMappings, RoleMappings, read_client_role_mappings, record};
use crate::store::{ResourceStore, get_typed};

#[derive(Clone, Debug, Default)]
pub struct ClientState {
    pub client: Option<Client>,
    /// Secret value held by the server for a confidential client.
    pub client_secret: Option<String>,
    /// Kubernetes secret mirroring the client credentials.
    pub secret: Option<Secret>,
    pub roles: Vec<Role>,
    /// Every client scope defined in the realm.
    pub available_client_scopes: Vec<ClientScope>,
    pub default_client_scopes: Vec<ClientScope>,
    pub service_account_user: Option<User>,
    pub service_account_realm_roles: RoleMappings,
    pub service_account_client_roles: BTreeMap<String, ClientRoleMappings>,
    pub secondary_resources: SecondaryResources,
}

impl ClientState {
    pub async fn read(
        client: &KeycloakClient,
        realm: &str,
        api: &dyn KeycloakApi,
        store: &dyn ResourceStore,
    ) -> Result<Self> {
        let ns = client.namespace().unwrap_or_default();
        let spec = &client.spec;
        let mut state = ClientState {
            client: api.find_client(realm, &spec.client.client_id).await?,
            secret: get_typed(store, &ns, &client_secret_name(&spec.client.client_id)).await?,
            ..Default::default()
        };
        record(&mut state.secondary_resources, "Secret", state.secret.as_ref());

        if !spec.client.default_client_scopes.is_empty() {
            state.available_client_scopes = api.list_client_scopes(realm).await?;
        }

        let Some(id) = state.client.as_ref().and_then(|c| c.id.clone()) else {
            return Ok(state);
        };

        if !state
            .client
            .as_ref()
            .and_then(|c| c.public_client)
            .unwrap_or(false)
        {
            state.client_secret = api.get_client_secret(realm, &id).await?;
        }
        state.roles = api.list_client_roles(realm, &id).await?;
        state.default_client_scopes = api.list_default_client_scopes(realm, &id).await?;

        if spec.has_service_account_roles() {
            state.service_account_user = api.get_service_account_user(realm, &id).await?;
            if let Some(user_id) = state.service_account_user.as_ref().and_then(|u| u.id.clone()) {
                let holder = RoleHolder::User(user_id);
                state.service_account_realm_roles =
                    RoleMappings::read(api, realm, &holder, &RoleScope::Realm).await?;
                state.service_account_client_roles = read_client_role_mappings(
                    api,
                    realm,
                    &holder,
                    spec.service_account_client_roles.keys(),
                )
                .await?;
            }
        }

        Ok(state)
    }
}
