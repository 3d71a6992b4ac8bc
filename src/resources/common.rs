//! Common resource generation utilities.
//!
//! Names, labels and owner references shared by every template.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};

use crate::capability::CustomKind;
use crate::crd::Keycloak;

/// Value of the `app` label on everything a Keycloak server owns.
pub const APPLICATION_NAME: &str = "keycloak";
/// Keycloak HTTPS service and StatefulSet name.
pub const KEYCLOAK_SERVICE_NAME: &str = "keycloak";
/// Headless service used for cluster discovery between server pods.
pub const KEYCLOAK_DISCOVERY_SERVICE_NAME: &str = "keycloak-discovery";
/// Name of the server container inside the StatefulSet.
pub const KEYCLOAK_CONTAINER_NAME: &str = "keycloak";
/// HTTPS port of the server.
pub const KEYCLOAK_HTTPS_PORT: i32 = 8443;
/// Port of the management interface that exposes metrics.
pub const KEYCLOAK_MONITORING_PORT: i32 = 9990;
/// JGroups port used for discovery.
pub const KEYCLOAK_DISCOVERY_PORT: i32 = 8888;
/// Secret the serving certificate is written to on OpenShift.
pub const KEYCLOAK_TLS_SECRET_NAME: &str = "sso-x509-https-secret";

/// Database secret shared by the server and the backup jobs.
pub const DATABASE_SECRET_NAME: &str = "keycloak-db-secret";
/// PostgreSQL Deployment, Service and Endpoints name.
pub const POSTGRESQL_NAME: &str = "keycloak-postgresql";
/// Volume claim backing the PostgreSQL data directory.
pub const POSTGRESQL_PVC_NAME: &str = "keycloak-postgresql-claim";
pub const POSTGRESQL_PORT: i32 = 5432;
/// Database name inside PostgreSQL.
pub const POSTGRESQL_DATABASE: &str = "root";

/// Name used for the Route, Ingress, PDB and monitoring objects.
pub const KEYCLOAK_EXTERNAL_NAME: &str = "keycloak";

const MANAGED_BY: &str = "keycloak-operator";

/// Standard labels applied to all resources owned by a Keycloak server.
pub fn standard_labels(keycloak: &Keycloak) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), APPLICATION_NAME.to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        keycloak.name_any(),
    );

    // Merge user-defined labels
    for (key, value) in &keycloak.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Standard labels plus a `component` label.
pub fn component_labels(keycloak: &Keycloak, component: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(keycloak);
    labels.insert("component".to_string(), component.to_string());
    labels
}

/// Labels selecting the pods of one component.
pub fn component_selector(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APPLICATION_NAME.to_string()),
        ("component".to_string(), component.to_string()),
    ])
}

/// Labels applied to resources owned by a realm, client or user CR.
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APPLICATION_NAME.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
    ])
}

/// User-defined annotations for a Keycloak server.
pub fn standard_annotations(keycloak: &Keycloak) -> Option<BTreeMap<String, String>> {
    if keycloak.spec.annotations.is_empty() {
        None
    } else {
        Some(keycloak.spec.annotations.clone())
    }
}

/// Controller owner reference for any custom resource.
pub fn owner_reference<K>(owner: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for an object owned by a Keycloak server.
pub fn keycloak_meta(keycloak: &Keycloak, name: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: keycloak.namespace(),
        labels: Some(component_labels(keycloak, component)),
        annotations: standard_annotations(keycloak),
        owner_references: Some(vec![owner_reference(keycloak)]),
        ..Default::default()
    }
}

/// An empty object of an optional kind, owned by a Keycloak server.
pub fn custom_object(keycloak: &Keycloak, kind: CustomKind, name: &str) -> DynamicObject {
    let mut object = DynamicObject::new(name, &kind.api_resource());
    object.metadata = keycloak_meta(keycloak, name, APPLICATION_NAME);
    object
}

/// Random credential for generated secrets: 32 hex characters from a v4 UUID.
pub fn generate_password() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::capability::ROUTE;
    use crate::crd::KeycloakSpec;

    fn keycloak() -> Keycloak {
        let mut kc = Keycloak::new("example", KeycloakSpec::default());
        kc.metadata.namespace = Some("sso".to_string());
        kc.metadata.uid = Some("uid-1".to_string());
        kc.spec.labels.insert("team".to_string(), "identity".to_string());
        kc
    }

    #[test]
    fn test_standard_labels_merge_user_labels() {
        let labels = standard_labels(&keycloak());
        assert_eq!(labels.get("app").unwrap(), "keycloak");
        assert_eq!(labels.get("team").unwrap(), "identity");
        assert_eq!(labels.get("app.kubernetes.io/instance").unwrap(), "example");
    }

    #[test]
    fn test_owner_reference_is_controller() {
        let owner = owner_reference(&keycloak());
        assert_eq!(owner.kind, "Keycloak");
        assert_eq!(owner.api_version, "keycloak.org/v1alpha1");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_custom_object_carries_type_and_owner() {
        let object = custom_object(&keycloak(), ROUTE, "keycloak");
        let types = object.types.unwrap();
        assert_eq!(types.kind, "Route");
        assert_eq!(types.api_version, "route.openshift.io/v1");
        assert_eq!(object.metadata.namespace.as_deref(), Some("sso"));
        assert_eq!(object.metadata.owner_references.unwrap().len(), 1);
    }

    #[test]
    fn test_generated_passwords_differ() {
        let a = generate_password();
        assert_eq!(a.len(), 32);
        assert_ne!(a, generate_password());
    }
}
