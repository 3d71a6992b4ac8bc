//! Service generation for Keycloak servers.
//!
//! Creates two services:
//! - **Keycloak Service**: HTTPS endpoint used by clients and by the operator
//! - **Discovery Service**: headless service the server pods use to find each other

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::Keycloak;
use crate::resources::common::{
    APPLICATION_NAME, KEYCLOAK_DISCOVERY_PORT, KEYCLOAK_DISCOVERY_SERVICE_NAME,
    KEYCLOAK_HTTPS_PORT, KEYCLOAK_MONITORING_PORT, KEYCLOAK_SERVICE_NAME,
    KEYCLOAK_TLS_SECRET_NAME, component_selector, keycloak_meta,
};

/// Annotation asking OpenShift to issue a serving certificate for the service.
const SERVING_CERT_ANNOTATION: &str = "service.alpha.openshift.io/serving-cert-secret-name";

/// Generate the HTTPS Service in front of the server pods.
pub fn generate_keycloak_service(keycloak: &Keycloak) -> Service {
    let mut metadata = keycloak_meta(keycloak, KEYCLOAK_SERVICE_NAME, APPLICATION_NAME);
    metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            SERVING_CERT_ANNOTATION.to_string(),
            KEYCLOAK_TLS_SECRET_NAME.to_string(),
        );

    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(component_selector(APPLICATION_NAME)),
            ports: Some(vec![
                ServicePort {
                    port: KEYCLOAK_HTTPS_PORT,
                    target_port: Some(IntOrString::Int(KEYCLOAK_HTTPS_PORT)),
                    name: Some(APPLICATION_NAME.to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: KEYCLOAK_MONITORING_PORT,
                    target_port: Some(IntOrString::Int(KEYCLOAK_MONITORING_PORT)),
                    name: Some("keycloak-monitoring".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Keep fields the API server assigns when updating the HTTPS Service.
pub fn merge_service(observed: &Service, mut desired: Service) -> Service {
    desired.metadata.resource_version = observed.metadata.resource_version.clone();
    if let (Some(spec), Some(observed_spec)) = (desired.spec.as_mut(), observed.spec.as_ref()) {
        spec.cluster_ip = observed_spec.cluster_ip.clone();
        spec.cluster_ips = observed_spec.cluster_ips.clone();
    }
    desired
}

/// Generate the headless discovery Service.
///
/// Not-ready addresses are published so starting pods can join the cluster
/// before they report ready.
pub fn generate_discovery_service(keycloak: &Keycloak) -> Service {
    Service {
        metadata: keycloak_meta(keycloak, KEYCLOAK_DISCOVERY_SERVICE_NAME, APPLICATION_NAME),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(component_selector(APPLICATION_NAME)),
            ports: Some(vec![ServicePort {
                port: KEYCLOAK_DISCOVERY_PORT,
                target_port: Some(IntOrString::Int(KEYCLOAK_DISCOVERY_PORT)),
                name: Some("discovery".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
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
    use crate::crd::KeycloakSpec;

    fn keycloak() -> Keycloak {
        let mut kc = Keycloak::new("example", KeycloakSpec::default());
        kc.metadata.namespace = Some("sso".to_string());
        kc
    }

    #[test]
    fn test_keycloak_service_ports() {
        let svc = generate_keycloak_service(&keycloak());
        assert_eq!(svc.metadata.name.as_deref(), Some("keycloak"));
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 8443);
        assert_eq!(ports[1].port, 9990);
        assert_eq!(
            svc.metadata
                .annotations
                .unwrap()
                .get(SERVING_CERT_ANNOTATION)
                .unwrap(),
            KEYCLOAK_TLS_SECRET_NAME
        );
    }

    #[test]
    fn test_merge_service_keeps_cluster_ip() {
        let mut observed = generate_keycloak_service(&keycloak());
        observed.metadata.resource_version = Some("3".to_string());
        observed.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.7".to_string());

        let merged = merge_service(&observed, generate_keycloak_service(&keycloak()));
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("3"));
        assert_eq!(merged.spec.unwrap().cluster_ip.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_discovery_service_is_headless() {
        let svc = generate_discovery_service(&keycloak());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
    }
}
