//! StatefulSet generation for Keycloak servers.
//!
//! Creates a StatefulSet running the Keycloak (or RH-SSO) image:
//! - Admin and database credentials injected from secrets
//! - DNS based cluster discovery through the headless service
//! - Serving certificate mounted when the platform provides one
//! - HTTP health checks against the master realm

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec, PodTemplateSpec,
    Probe, SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::Keycloak;
use crate::keycloak::auth::admin_secret_name;
use crate::resources::common::{
    APPLICATION_NAME, DATABASE_SECRET_NAME, KEYCLOAK_CONTAINER_NAME, KEYCLOAK_DISCOVERY_PORT,
    KEYCLOAK_DISCOVERY_SERVICE_NAME, KEYCLOAK_HTTPS_PORT, KEYCLOAK_MONITORING_PORT,
    KEYCLOAK_SERVICE_NAME, KEYCLOAK_TLS_SECRET_NAME, POSTGRESQL_NAME, POSTGRESQL_PORT,
    component_labels, component_selector, keycloak_meta,
};

/// Plain HTTP port, used by the health checks.
const KEYCLOAK_HTTP_PORT: i32 = 8080;
/// Where the serving certificate is mounted.
const TLS_MOUNT_PATH: &str = "/etc/x509/https";
const TLS_VOLUME_NAME: &str = "sso-x509-https-volume";

/// Generate the server StatefulSet for a Keycloak.
///
/// `image` is the server image selected by the spec's profile.
pub fn generate_statefulset(keycloak: &Keycloak, image: &str) -> StatefulSet {
    let labels = component_labels(keycloak, APPLICATION_NAME);

    StatefulSet {
        metadata: keycloak_meta(keycloak, KEYCLOAK_SERVICE_NAME, APPLICATION_NAME),
        spec: Some(StatefulSetSpec {
            replicas: Some(keycloak.spec.instances),
            service_name: Some(KEYCLOAK_DISCOVERY_SERVICE_NAME.to_string()),
            selector: LabelSelector {
                match_labels: Some(component_selector(APPLICATION_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![generate_keycloak_container(keycloak, image)],
                    volumes: Some(vec![Volume {
                        name: TLS_VOLUME_NAME.to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(KEYCLOAK_TLS_SECRET_NAME.to_string()),
                            // Only OpenShift issues the serving certificate
                            optional: Some(true),
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

/// Keep the observed resourceVersion when updating the StatefulSet.
pub fn merge_statefulset(observed: &StatefulSet, mut desired: StatefulSet) -> StatefulSet {
    desired.metadata.resource_version = observed.metadata.resource_version.clone();
    desired
}

/// Image of the Keycloak container in a StatefulSet.
pub fn keycloak_image(statefulset: &StatefulSet) -> Option<&str> {
    statefulset
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == KEYCLOAK_CONTAINER_NAME)?
        .image
        .as_deref()
}

/// Desired replica count of a StatefulSet.
pub fn replicas(statefulset: &StatefulSet) -> Option<i32> {
    statefulset.spec.as_ref().and_then(|s| s.replicas)
}

/// Force the replica count of a StatefulSet.
pub fn set_replicas(statefulset: &mut StatefulSet, replicas: i32) {
    if let Some(spec) = statefulset.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
}

fn generate_keycloak_container(keycloak: &Keycloak, image: &str) -> Container {
    Container {
        name: KEYCLOAK_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        ports: Some(vec![
            ContainerPort {
                container_port: KEYCLOAK_HTTPS_PORT,
                name: Some("https".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: KEYCLOAK_HTTP_PORT,
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: KEYCLOAK_MONITORING_PORT,
                name: Some("monitoring".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: KEYCLOAK_DISCOVERY_PORT,
                name: Some("discovery".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(generate_env_vars(keycloak)),
        volume_mounts: Some(vec![VolumeMount {
            name: TLS_VOLUME_NAME.to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        liveness_probe: Some(http_check(120)),
        readiness_probe: Some(http_check(30)),
        ..Default::default()
    }
}

fn value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment for the server container.
///
/// RH-SSO and upstream Keycloak images read differently named variables for
/// the same settings.
fn generate_env_vars(keycloak: &Keycloak) -> Vec<EnvVar> {
    let namespace = keycloak.namespace().unwrap_or_default();
    let admin_secret = admin_secret_name(&keycloak.name_any());
    let discovery_query = format!(
        "{}.{}.svc.cluster.local",
        KEYCLOAK_DISCOVERY_SERVICE_NAME, namespace
    );

    if keycloak.spec.is_rhsso() {
        vec![
            from_secret("SSO_ADMIN_USERNAME", &admin_secret, "ADMIN_USERNAME"),
            from_secret("SSO_ADMIN_PASSWORD", &admin_secret, "ADMIN_PASSWORD"),
            value("DB_SERVICE_PREFIX_MAPPING", format!("{}=DB", POSTGRESQL_NAME)),
            value("TX_DATABASE_PREFIX_MAPPING", format!("{}=DB", POSTGRESQL_NAME)),
            value("DB_JNDI", "java:jboss/datasources/KeycloakDS"),
            from_secret("DB_DATABASE", DATABASE_SECRET_NAME, "POSTGRES_DATABASE"),
            from_secret("DB_USERNAME", DATABASE_SECRET_NAME, "POSTGRES_USERNAME"),
            from_secret("DB_PASSWORD", DATABASE_SECRET_NAME, "POSTGRES_PASSWORD"),
            value("JGROUPS_PING_PROTOCOL", "dns.DNS_PING"),
            value("OPENSHIFT_DNS_PING_SERVICE_NAME", discovery_query),
            value("OPENSHIFT_DNS_PING_SERVICE_PORT", KEYCLOAK_DISCOVERY_PORT.to_string()),
            value("X509_CA_BUNDLE", "/var/run/secrets/kubernetes.io/serviceaccount/*.crt"),
        ]
    } else {
        vec![
            from_secret("KEYCLOAK_USER", &admin_secret, "ADMIN_USERNAME"),
            from_secret("KEYCLOAK_PASSWORD", &admin_secret, "ADMIN_PASSWORD"),
            value("DB_VENDOR", "POSTGRES"),
            value("DB_SCHEMA", "public"),
            value(
                "DB_ADDR",
                format!("{}.{}.svc.cluster.local", POSTGRESQL_NAME, namespace),
            ),
            value("DB_PORT", POSTGRESQL_PORT.to_string()),
            from_secret("DB_DATABASE", DATABASE_SECRET_NAME, "POSTGRES_DATABASE"),
            from_secret("DB_USER", DATABASE_SECRET_NAME, "POSTGRES_USERNAME"),
            from_secret("DB_PASSWORD", DATABASE_SECRET_NAME, "POSTGRES_PASSWORD"),
            value("JGROUPS_DISCOVERY_PROTOCOL", "dns.DNS_PING"),
            value(
                "JGROUPS_DISCOVERY_PROPERTIES",
                format!("dns_query={}", discovery_query),
            ),
            value("PROXY_ADDRESS_FORWARDING", "true"),
        ]
    }
}

fn http_check(initial_delay_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/auth/realms/master".to_string()),
            port: IntOrString::Int(KEYCLOAK_HTTP_PORT),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        timeout_seconds: Some(2),
        failure_threshold: Some(10),
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
    use crate::crd::{KeycloakSpec, RHSSO_PROFILE};

    fn keycloak(instances: i32) -> Keycloak {
        let mut kc = Keycloak::new(
            "example",
            KeycloakSpec {
                instances,
                ..Default::default()
            },
        );
        kc.metadata.namespace = Some("sso".to_string());
        kc
    }

    fn env_names(sts: &StatefulSet) -> Vec<String> {
        let container = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    #[test]
    fn test_generate_statefulset() {
        let sts = generate_statefulset(&keycloak(3), "quay.io/keycloak/keycloak:9.0.2");

        assert_eq!(sts.metadata.name.as_deref(), Some("keycloak"));
        assert_eq!(sts.metadata.namespace.as_deref(), Some("sso"));
        assert_eq!(replicas(&sts), Some(3));
        assert_eq!(keycloak_image(&sts), Some("quay.io/keycloak/keycloak:9.0.2"));

        let spec = sts.spec.unwrap();
        assert_eq!(spec.service_name.as_deref(), Some("keycloak-discovery"));
        assert_eq!(
            spec.selector.match_labels.unwrap().get("component").unwrap(),
            "keycloak"
        );
    }

    #[test]
    fn test_env_follows_profile() {
        let sts = generate_statefulset(&keycloak(1), "keycloak");
        assert!(env_names(&sts).contains(&"KEYCLOAK_USER".to_string()));

        let mut rhsso = keycloak(1);
        rhsso.spec.profile = Some(RHSSO_PROFILE.to_string());
        let sts = generate_statefulset(&rhsso, "sso");
        assert!(env_names(&sts).contains(&"SSO_ADMIN_USERNAME".to_string()));
    }

    #[test]
    fn test_set_replicas() {
        let mut sts = generate_statefulset(&keycloak(5), "keycloak");
        set_replicas(&mut sts, 1);
        assert_eq!(replicas(&sts), Some(1));
    }
}
