//! Snapshot of a realm and the credential secrets of its inline users.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{KeycloakRealm, SecondaryResources};
use crate::keycloak::KeycloakApi;
use crate::keycloak::types::Realm;
use crate::resources::secrets::user_secret_name;
use crate::state::record;
use crate::store::{ResourceStore, get_typed};

#[derive(Clone, Debug, Default)]
pub struct RealmState {
    pub realm: Option<Realm>,
    /// Credential secrets of inline users, keyed by username.
    pub user_secrets: BTreeMap<String, Secret>,
    pub secondary_resources: SecondaryResources,
}

impl RealmState {
    pub async fn read(
        realm: &KeycloakRealm,
        api: &dyn KeycloakApi,
        store: &dyn ResourceStore,
    ) -> Result<Self> {
        let ns = realm.namespace().unwrap_or_default();
        let name = realm.realm_name();
        let mut state = RealmState {
            realm: api.get_realm(name).await?,
            ..Default::default()
        };

        for user in &realm.spec.realm.users {
            let secret_name = user_secret_name(name, &user.username, &ns);
            let secret: Option<Secret> = get_typed(store, &ns, &secret_name).await?;
            record(&mut state.secondary_resources, "Secret", secret.as_ref());
            if let Some(secret) = secret {
                state.user_secrets.insert(user.username.clone(), secret);
            }
        }

        Ok(state)
    }
}
