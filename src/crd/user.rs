//! KeycloakUser Custom Resource Definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{LabelSelectorSpec, ResourceStatus};
use crate::keycloak::types::User;

/// KeycloakUser declares a user in every realm matched by `realmSelector`.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "keycloak.org",
    version = "v1alpha1",
    kind = "KeycloakUser",
    plural = "keycloakusers",
    shortname = "kcu",
    status = "KeycloakUserStatus",
    namespaced,
    printcolumn = r#"{"name":"Username", "type":"string", "jsonPath":".spec.user.username"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakUserSpec {
    /// Selects the realms this user lives in.
    #[serde(default)]
    pub realm_selector: LabelSelectorSpec,

    /// The user representation, including desired roles and groups.
    pub user: User,
}

pub type KeycloakUserStatus = ResourceStatus;
