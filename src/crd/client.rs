//! KeycloakClient Custom Resource Definition.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{LabelSelectorSpec, ResourceStatus};
use crate::keycloak::types::{Client, Role};

/// KeycloakClient declares an OIDC/SAML client in every realm matched by
/// `realmSelector`.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "keycloak.org",
    version = "v1alpha1",
    kind = "KeycloakClient",
    plural = "keycloakclients",
    shortname = "kcc",
    status = "KeycloakClientStatus",
    namespaced,
    printcolumn = r#"{"name":"Client", "type":"string", "jsonPath":".spec.client.clientId"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakClientSpec {
    /// Selects the realms this client lives in.
    #[serde(default)]
    pub realm_selector: LabelSelectorSpec,

    /// The client representation sent to Keycloak.
    pub client: Client,

    /// Client roles to define.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Role>,

    /// Realm roles granted to the client's service account.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_account_realm_roles: Vec<String>,

    /// Client roles granted to the client's service account, keyed by clientId.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_account_client_roles: BTreeMap<String, Vec<String>>,
}

pub type KeycloakClientStatus = ResourceStatus;

impl KeycloakClientSpec {
    /// Whether the service account roles need reconciling at all.
    pub fn has_service_account_roles(&self) -> bool {
        self.client.service_accounts_enabled == Some(true)
            && (!self.service_account_realm_roles.is_empty()
                || !self.service_account_client_roles.is_empty())
    }
}
