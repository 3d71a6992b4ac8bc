//! PostgreSQL generation for Keycloak servers.
//!
//! A managed database is a single-replica Deployment on a PVC. An external
//! database gets a selector-less Service plus Endpoints pointing at the
//! address from the database secret, or an ExternalName Service when that
//! address is a host name. Either way the server connects to the same
//! in-cluster name.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EndpointAddress, EndpointPort, EndpointSubset, Endpoints,
    EnvVar, EnvVarSource, ExecAction, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, SecretKeySelector,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::Keycloak;
use crate::resources::common::{
    DATABASE_SECRET_NAME, POSTGRESQL_NAME, POSTGRESQL_PORT, POSTGRESQL_PVC_NAME,
    component_labels, component_selector, keycloak_meta,
};

/// Requested size of the database volume.
const POSTGRESQL_VOLUME_SIZE: &str = "1Gi";
const POSTGRESQL_DATA_PATH: &str = "/var/lib/pgsql/data";

/// Generate the PVC backing the database.
pub fn generate_pvc(keycloak: &Keycloak) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: keycloak_meta(keycloak, POSTGRESQL_PVC_NAME, POSTGRESQL_NAME),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: keycloak.spec.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(POSTGRESQL_VOLUME_SIZE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Claims are immutable apart from their size, so updates keep the observed spec.
pub fn merge_pvc(
    observed: &PersistentVolumeClaim,
    mut desired: PersistentVolumeClaim,
) -> PersistentVolumeClaim {
    desired.metadata.resource_version = observed.metadata.resource_version.clone();
    desired.spec = observed.spec.clone();
    desired
}

fn from_database_secret(name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: DATABASE_SECRET_NAME.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pg_isready_check(initial_delay_seconds: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "psql -h 127.0.0.1 -U $POSTGRESQL_USER -q -d $POSTGRESQL_DATABASE -c 'SELECT 1'"
                    .to_string(),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        timeout_seconds: Some(1),
        ..Default::default()
    }
}

/// Generate the PostgreSQL Deployment.
pub fn generate_deployment(keycloak: &Keycloak, image: &str) -> Deployment {
    Deployment {
        metadata: keycloak_meta(keycloak, POSTGRESQL_NAME, POSTGRESQL_NAME),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            // Two pods must never share the data directory
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(component_selector(POSTGRESQL_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(component_labels(keycloak, POSTGRESQL_NAME)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: POSTGRESQL_NAME.to_string(),
                        image: Some(image.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: POSTGRESQL_PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        env: Some(vec![
                            from_database_secret("POSTGRESQL_USER", "POSTGRES_USERNAME"),
                            from_database_secret("POSTGRESQL_PASSWORD", "POSTGRES_PASSWORD"),
                            from_database_secret("POSTGRESQL_DATABASE", "POSTGRES_DATABASE"),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: POSTGRESQL_PVC_NAME.to_string(),
                            mount_path: POSTGRESQL_DATA_PATH.to_string(),
                            ..Default::default()
                        }]),
                        liveness_probe: Some(pg_isready_check(30)),
                        readiness_probe: Some(pg_isready_check(5)),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: POSTGRESQL_PVC_NAME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: POSTGRESQL_PVC_NAME.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the Service in front of the managed database.
pub fn generate_service(keycloak: &Keycloak) -> Service {
    Service {
        metadata: keycloak_meta(keycloak, POSTGRESQL_NAME, POSTGRESQL_NAME),
        spec: Some(ServiceSpec {
            selector: Some(component_selector(POSTGRESQL_NAME)),
            ports: Some(vec![postgresql_port()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the selector-less Service for an external database.
pub fn generate_external_service(keycloak: &Keycloak) -> Service {
    Service {
        metadata: keycloak_meta(keycloak, POSTGRESQL_NAME, POSTGRESQL_NAME),
        spec: Some(ServiceSpec {
            ports: Some(vec![postgresql_port()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate an ExternalName Service for an external database given by host name.
pub fn generate_external_name_service(keycloak: &Keycloak, host: &str) -> Service {
    Service {
        metadata: keycloak_meta(keycloak, POSTGRESQL_NAME, POSTGRESQL_NAME),
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(host.to_string()),
            ports: Some(vec![postgresql_port()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the Endpoints naming an external database address.
pub fn generate_external_endpoints(keycloak: &Keycloak, address: &str, port: i32) -> Endpoints {
    Endpoints {
        metadata: keycloak_meta(keycloak, POSTGRESQL_NAME, POSTGRESQL_NAME),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: address.to_string(),
                ..Default::default()
            }]),
            ports: Some(vec![EndpointPort {
                port,
                protocol: Some("TCP".to_string()),
                name: Some(POSTGRESQL_NAME.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

fn postgresql_port() -> ServicePort {
    ServicePort {
        port: POSTGRESQL_PORT,
        target_port: Some(IntOrString::Int(POSTGRESQL_PORT)),
        name: Some(POSTGRESQL_NAME.to_string()),
        protocol: Some("TCP".to_string()),
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
        let mut kc = Keycloak::new(
            "example",
            KeycloakSpec {
                storage_class_name: Some("fast".to_string()),
                ..Default::default()
            },
        );
        kc.metadata.namespace = Some("sso".to_string());
        kc
    }

    #[test]
    fn test_pvc_uses_storage_class() {
        let pvc = generate_pvc(&keycloak());
        assert_eq!(pvc.metadata.name.as_deref(), Some("keycloak-postgresql-claim"));
        assert_eq!(
            pvc.spec.unwrap().storage_class_name.as_deref(),
            Some("fast")
        );
    }

    #[test]
    fn test_deployment_mounts_claim() {
        let deployment = generate_deployment(&keycloak(), "postgres:10");
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod = spec.template.spec.unwrap();
        assert_eq!(
            pod.volumes.unwrap()[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "keycloak-postgresql-claim"
        );
        assert_eq!(pod.containers[0].image.as_deref(), Some("postgres:10"));
    }

    #[test]
    fn test_external_service_has_no_selector() {
        let svc = generate_external_service(&keycloak());
        assert!(svc.spec.unwrap().selector.is_none());

        let endpoints = generate_external_endpoints(&keycloak(), "10.1.2.3", 5433);
        let subset = &endpoints.subsets.unwrap()[0];
        assert_eq!(subset.addresses.as_ref().unwrap()[0].ip, "10.1.2.3");
        assert_eq!(subset.ports.as_ref().unwrap()[0].port, 5433);
    }

    #[test]
    fn test_external_name_service() {
        let spec = generate_external_name_service(&keycloak(), "db.example.com")
            .spec
            .unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ExternalName"));
        assert_eq!(spec.external_name.as_deref(), Some("db.example.com"));
    }
}
