//! KeycloakBackup Custom Resource Definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{LabelSelectorSpec, ResourceStatus};

/// KeycloakBackup takes a database dump of the Keycloak servers matched by
/// `instanceSelector`, either to a local volume or to S3.
///
/// Example:
/// ```yaml
/// apiVersion: keycloak.org/v1alpha1
/// kind: KeycloakBackup
/// metadata:
///   name: nightly
/// spec:
///   instanceSelector:
///     matchLabels:
///       app: sso
///   aws:
///     credentialsSecretName: s3-backup
///     schedule: "0 3 * * *"
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "keycloak.org",
    version = "v1alpha1",
    kind = "KeycloakBackup",
    plural = "keycloakbackups",
    shortname = "kcb",
    status = "KeycloakBackupStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Schedule", "type":"string", "jsonPath":".spec.aws.schedule"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakBackupSpec {
    /// Selects the Keycloak server whose database is backed up.
    #[serde(default)]
    pub instance_selector: LabelSelectorSpec,

    /// Upload to S3 instead of a local volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsBackupSpec>,

    /// Storage class for the local backup volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsBackupSpec {
    /// Secret with AWS_S3_BUCKET_NAME, AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY.
    pub credentials_secret_name: String,

    /// Secret holding a GPG key used to encrypt the dump.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_secret_name: Option<String>,

    /// Cron schedule. A one-shot Job is created when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

pub type KeycloakBackupStatus = ResourceStatus;

impl KeycloakBackupSpec {
    /// Whether this backup runs on a schedule.
    pub fn is_scheduled(&self) -> bool {
        self.aws
            .as_ref()
            .and_then(|aws| aws.schedule.as_deref())
            .is_some_and(|s| !s.trim().is_empty())
    }
}
