//! Keycloak Custom Resource Definition.
//!
//! Describes one Keycloak server topology: the server StatefulSet, its
//! database, its services and how it is reached from outside the cluster.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, SecondaryResources, StatusPhase};

/// Profile name that selects the Red Hat SSO image instead of upstream Keycloak.
pub const RHSSO_PROFILE: &str = "RHSSO";

/// Keycloak is a custom resource describing a Keycloak server.
///
/// Example:
/// ```yaml
/// apiVersion: keycloak.org/v1alpha1
/// kind: Keycloak
/// metadata:
///   name: example-keycloak
///   labels:
///     app: sso
/// spec:
///   instances: 2
///   externalAccess:
///     enabled: true
///   migration:
///     strategy: recreate
///     backups:
///       enabled: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "keycloak.org",
    version = "v1alpha1",
    kind = "Keycloak",
    plural = "keycloaks",
    shortname = "kc",
    status = "KeycloakStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Instances", "type":"integer", "jsonPath":".spec.instances"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".status.externalURL"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakSpec {
    /// Number of Keycloak server pods (default 1).
    #[serde(default = "default_instances")]
    pub instances: i32,

    /// Image profile. `RHSSO` selects the Red Hat SSO image; anything else
    /// selects upstream Keycloak.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Exposure of the server outside the cluster.
    #[serde(default)]
    pub external_access: ExternalAccessSpec,

    /// Use a database that is not managed by the operator.
    #[serde(default)]
    pub external_database: ExternalDatabaseSpec,

    /// Manage realms on a Keycloak server that runs outside this cluster.
    #[serde(default)]
    pub external: ExternalKeycloakSpec,

    /// When true the operator creates no topology for this server and only
    /// uses it as a target for realms.
    #[serde(default)]
    pub unmanaged: bool,

    /// Behaviour when the server image changes incompatibly.
    #[serde(default)]
    pub migration: MigrationSpec,

    /// PodDisruptionBudget settings.
    #[serde(default)]
    pub pod_disruption_budget: PodDisruptionBudgetSpec,

    /// Prometheus and Grafana integration.
    #[serde(default)]
    pub monitoring: MonitoringSpec,

    /// Storage class for the database volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Additional labels to apply to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations to apply to all managed resources.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for KeycloakSpec {
    fn default() -> Self {
        Self {
            instances: default_instances(),
            profile: None,
            external_access: ExternalAccessSpec::default(),
            external_database: ExternalDatabaseSpec::default(),
            external: ExternalKeycloakSpec::default(),
            unmanaged: false,
            migration: MigrationSpec::default(),
            pod_disruption_budget: PodDisruptionBudgetSpec::default(),
            monitoring: MonitoringSpec::default(),
            storage_class_name: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

fn default_instances() -> i32 {
    1
}

impl KeycloakSpec {
    /// Whether the RHSSO profile is selected.
    pub fn is_rhsso(&self) -> bool {
        self.profile.as_deref() == Some(RHSSO_PROFILE)
    }

    /// Whether the operator manages any topology for this server.
    pub fn manages_topology(&self) -> bool {
        !self.unmanaged && !self.external.enabled
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccessSpec {
    #[serde(default)]
    pub enabled: bool,

    /// Hostname for the Ingress. Routes get a generated host when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// TLS termination for the Route: `reencrypt` (default) or `passthrough`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_termination: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDatabaseSpec {
    /// Read connection details from the database secret instead of
    /// deploying PostgreSQL.
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalKeycloakSpec {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the external server, e.g. `https://sso.example.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    #[serde(default)]
    pub strategy: MigrationStrategy,

    #[serde(default)]
    pub backups: MigrationBackupSpec,
}

/// How the server StatefulSet moves across an incompatible image change.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStrategy {
    /// Scale the server down to a single pod while the new image starts.
    #[default]
    Recreate,
    /// Let the StatefulSet roll pods as it normally would.
    Rolling,
}

impl std::fmt::Display for MigrationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStrategy::Recreate => write!(f, "recreate"),
            MigrationStrategy::Rolling => write!(f, "rolling"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationBackupSpec {
    /// Take a backup before migrating.
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodDisruptionBudgetSpec {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// Create ServiceMonitor, PrometheusRule and GrafanaDashboard objects
    /// when those kinds exist in the cluster.
    #[serde(default)]
    pub enabled: bool,
}

/// Status of a Keycloak server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakStatus {
    #[serde(default)]
    pub phase: StatusPhase,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub ready: bool,

    /// Image tag of the running server.
    #[serde(default)]
    pub version: String,

    /// In-cluster admin URL.
    #[serde(default, rename = "internalURL")]
    pub internal_url: String,

    /// URL reachable from outside the cluster, if exposed.
    #[serde(default, rename = "externalURL")]
    pub external_url: String,

    /// Name of the secret holding admin credentials.
    #[serde(default)]
    pub credential_secret: String,

    #[serde(default, skip_serializing_if = "SecondaryResources::is_empty")]
    pub secondary_resources: SecondaryResources,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
