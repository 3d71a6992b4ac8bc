//! KeycloakGroup Custom Resource Definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{LabelSelectorSpec, ResourceStatus};
use crate::keycloak::types::Group;

/// KeycloakGroup declares a group in every realm matched by `realmSelector`.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "keycloak.org",
    version = "v1alpha1",
    kind = "KeycloakGroup",
    plural = "keycloakgroups",
    shortname = "kcg",
    status = "KeycloakGroupStatus",
    namespaced,
    printcolumn = r#"{"name":"Group", "type":"string", "jsonPath":".spec.group.name"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakGroupSpec {
    /// Selects the realms this group lives in.
    #[serde(default)]
    pub realm_selector: LabelSelectorSpec,

    /// The group representation, including desired roles.
    pub group: Group,
}

pub type KeycloakGroupStatus = ResourceStatus;
