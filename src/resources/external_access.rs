//! External access to a Keycloak server.
//!
//! An OpenShift Route is used when the cluster serves Routes; otherwise an
//! Ingress with an HTTPS backend.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::DynamicObject;
use serde_json::json;

use crate::capability::ROUTE;
use crate::crd::Keycloak;
use crate::resources::common::{
    APPLICATION_NAME, KEYCLOAK_EXTERNAL_NAME, KEYCLOAK_HTTPS_PORT, KEYCLOAK_SERVICE_NAME,
    custom_object, keycloak_meta,
};

/// Host used by the Ingress when the spec names none.
pub const DEFAULT_INGRESS_HOST: &str = "keycloak.local";
/// Route TLS termination when the spec names none.
pub const DEFAULT_TLS_TERMINATION: &str = "reencrypt";

/// Generate the Route exposing the Keycloak Service.
pub fn generate_route(keycloak: &Keycloak) -> DynamicObject {
    let termination = keycloak
        .spec
        .external_access
        .tls_termination
        .as_deref()
        .unwrap_or(DEFAULT_TLS_TERMINATION);

    let mut spec = json!({
        "to": {
            "kind": "Service",
            "name": KEYCLOAK_SERVICE_NAME,
        },
        "port": {
            "targetPort": APPLICATION_NAME,
        },
        "tls": {
            "termination": termination,
        },
    });
    if let Some(host) = &keycloak.spec.external_access.host {
        spec["host"] = json!(host);
    }

    let mut route = custom_object(keycloak, ROUTE, KEYCLOAK_EXTERNAL_NAME);
    route.data = json!({ "spec": spec });
    route
}

/// Keep the observed resourceVersion and the host the router generated.
pub fn merge_route(observed: &DynamicObject, mut desired: DynamicObject) -> DynamicObject {
    desired.metadata.resource_version = observed.metadata.resource_version.clone();
    if desired.data["spec"].get("host").is_none() {
        if let Some(host) = observed.data["spec"].get("host") {
            desired.data["spec"]["host"] = host.clone();
        }
    }
    desired
}

/// Host of an observed Route, if assigned.
pub fn route_host(route: &DynamicObject) -> Option<&str> {
    route.data["spec"]["host"].as_str()
}

/// Generate the Ingress exposing the Keycloak Service.
pub fn generate_ingress(keycloak: &Keycloak) -> Ingress {
    let host = keycloak
        .spec
        .external_access
        .host
        .clone()
        .unwrap_or_else(|| DEFAULT_INGRESS_HOST.to_string());

    let mut metadata = keycloak_meta(keycloak, KEYCLOAK_EXTERNAL_NAME, APPLICATION_NAME);
    metadata.annotations.get_or_insert_with(BTreeMap::new).insert(
        "nginx.ingress.kubernetes.io/backend-protocol".to_string(),
        "HTTPS".to_string(),
    );

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: KEYCLOAK_SERVICE_NAME.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(KEYCLOAK_HTTPS_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Host of an observed Ingress.
pub fn ingress_host(ingress: &Ingress) -> Option<&str> {
    ingress
        .spec
        .as_ref()?
        .rules
        .as_ref()?
        .first()?
        .host
        .as_deref()
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
    use crate::crd::{ExternalAccessSpec, KeycloakSpec};

    fn keycloak(host: Option<&str>) -> Keycloak {
        let mut kc = Keycloak::new(
            "example",
            KeycloakSpec {
                external_access: ExternalAccessSpec {
                    enabled: true,
                    host: host.map(str::to_string),
                    tls_termination: None,
                },
                ..Default::default()
            },
        );
        kc.metadata.namespace = Some("sso".to_string());
        kc
    }

    #[test]
    fn test_route_targets_keycloak_service() {
        let route = generate_route(&keycloak(None));
        assert_eq!(route.data["spec"]["to"]["name"], "keycloak");
        assert_eq!(route.data["spec"]["tls"]["termination"], "reencrypt");
        assert!(route_host(&route).is_none());
    }

    #[test]
    fn test_merge_route_keeps_generated_host() {
        let mut observed = generate_route(&keycloak(None));
        observed.metadata.resource_version = Some("9".to_string());
        observed.data["spec"]["host"] = json!("keycloak-sso.apps.example.com");

        let merged = merge_route(&observed, generate_route(&keycloak(None)));
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("9"));
        assert_eq!(route_host(&merged), Some("keycloak-sso.apps.example.com"));
    }

    #[test]
    fn test_ingress_host() {
        assert_eq!(
            ingress_host(&generate_ingress(&keycloak(None))),
            Some(DEFAULT_INGRESS_HOST)
        );
        assert_eq!(
            ingress_host(&generate_ingress(&keycloak(Some("sso.example.com")))),
            Some("sso.example.com")
        );
    }
}
