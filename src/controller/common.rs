//! Shared controller helpers.
//!
//! Finalizers, status patches and the label-selector lookups that bind
//! realms to servers and clients, users and groups to realms.

use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Result;
use crate::crd::{Keycloak, KeycloakRealm, LabelSelectorSpec};
use crate::keycloak::KeycloakApi;

/// Finalizer placed on resources whose deletion must remove remote state.
pub const FINALIZER: &str = "keycloak.org/finalizer";

/// Add a finalizer to a resource.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<()>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();

    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<()>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            // Already gone
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();

    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Replace the status subresource of a resource.
pub async fn patch_status<T, S>(api: &Api<T>, name: &str, status: &S) -> Result<()>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
    S: Serialize,
{
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Keep the items whose labels satisfy the selector.
pub fn select<K: ResourceExt>(
    items: impl IntoIterator<Item = K>,
    selector: &LabelSelectorSpec,
) -> Vec<K> {
    items
        .into_iter()
        .filter(|item| selector.matches(item.labels()))
        .collect()
}

/// List the objects in a namespace matched by a selector.
///
/// An empty selector matches nothing and does not hit the API server.
pub async fn list_selected<K>(
    client: &Client,
    namespace: &str,
    selector: &LabelSelectorSpec,
) -> Result<Vec<K>>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
{
    let labels = selector.to_selector_string();
    if labels.is_empty() {
        return Ok(Vec::new());
    }
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&ListParams::default().labels(&labels)).await?;
    Ok(select(list.items, selector))
}

/// Servers matched by a selector, skipping those already being deleted.
///
/// A server on its way out takes its realms with it, so there is nothing
/// left to reconcile on it.
pub async fn select_keycloaks(
    client: &Client,
    namespace: &str,
    selector: &LabelSelectorSpec,
) -> Result<Vec<Keycloak>> {
    let keycloaks: Vec<Keycloak> = list_selected(client, namespace, selector).await?;
    Ok(keycloaks
        .into_iter()
        .filter(|kc| kc.metadata.deletion_timestamp.is_none())
        .collect())
}

/// A realm on a specific server.
#[derive(Clone, Debug)]
pub struct RealmTarget {
    pub keycloak: Keycloak,
    pub realm: String,
}

/// Pair every realm matched by a selector with each server it lives on.
pub async fn realm_targets(
    client: &Client,
    namespace: &str,
    selector: &LabelSelectorSpec,
) -> Result<Vec<RealmTarget>> {
    let realms: Vec<KeycloakRealm> = list_selected(client, namespace, selector).await?;
    let mut targets: Vec<RealmTarget> = Vec::new();
    for realm in &realms {
        let keycloaks = select_keycloaks(client, namespace, &realm.spec.instance_selector).await?;
        for keycloak in keycloaks {
            let duplicate = targets.iter().any(|t| {
                t.realm == realm.realm_name() && t.keycloak.name_any() == keycloak.name_any()
            });
            if !duplicate {
                targets.push(RealmTarget {
                    keycloak,
                    realm: realm.realm_name().to_string(),
                });
            }
        }
    }
    debug!(namespace = %namespace, targets = targets.len(), "Resolved realm targets");
    Ok(targets)
}

/// Log in to a server's admin API.
pub async fn admin_client(ctx: &Context, keycloak: &Keycloak) -> Result<Arc<dyn KeycloakApi>> {
    let client = ctx.keycloak_clients.authenticated_client(keycloak).await?;
    Ok(Arc::new(client))
}
