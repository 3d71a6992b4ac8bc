//! KeycloakRealm Custom Resource Definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{LabelSelectorSpec, ResourceStatus};
use crate::keycloak::types::Realm;

/// KeycloakRealm declares one realm on every Keycloak server matched by
/// `instanceSelector`.
///
/// Example:
/// ```yaml
/// apiVersion: keycloak.org/v1alpha1
/// kind: KeycloakRealm
/// metadata:
///   name: demo
/// spec:
///   instanceSelector:
///     matchLabels:
///       app: sso
///   realm:
///     realm: demo
///     enabled: true
///     users:
///       - username: alice
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "keycloak.org",
    version = "v1alpha1",
    kind = "KeycloakRealm",
    plural = "keycloakrealms",
    shortname = "kcr",
    status = "KeycloakRealmStatus",
    namespaced,
    printcolumn = r#"{"name":"Realm", "type":"string", "jsonPath":".spec.realm.realm"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakRealmSpec {
    /// Leave the realm alone; only used as a target for clients and users.
    #[serde(default)]
    pub unmanaged: bool,

    /// Selects the Keycloak servers this realm is created on.
    #[serde(default)]
    pub instance_selector: LabelSelectorSpec,

    /// The realm representation sent to Keycloak.
    pub realm: Realm,

    /// Identity providers to use as browser-flow redirectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub realm_overrides: Vec<RedirectorIdentityProviderOverride>,
}

/// Makes the browser flow redirect straight to an identity provider.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedirectorIdentityProviderOverride {
    /// Alias of the identity provider to redirect to.
    pub identity_provider: String,

    /// Flow to configure. Only `browser` is supported.
    #[serde(default = "default_flow")]
    pub for_flow: String,
}

fn default_flow() -> String {
    "browser".to_string()
}

pub type KeycloakRealmStatus = ResourceStatus;

impl KeycloakRealm {
    /// Name of the realm inside Keycloak.
    pub fn realm_name(&self) -> &str {
        &self.spec.realm.realm
    }
}
