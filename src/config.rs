//! Operator configuration.
//!
//! Every setting is a command line flag with an environment variable
//! fallback, so the operator can be configured from its Deployment manifest.

use std::time::Duration;

use clap::{Args, Parser};

use crate::crd::KeycloakSpec;

/// Keycloak operator.
#[derive(Clone, Debug, Parser)]
#[command(name = "keycloak-operator")]
#[command(about = "Reconciles Keycloak servers, realms, clients, users, groups and backups")]
#[command(version)]
pub struct OperatorConfig {
    /// Restrict the operator to one namespace. Watches all namespaces when unset.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[command(flatten)]
    pub images: Images,

    /// Interval between optional resource kind scans, in seconds.
    #[arg(long, env = "CAPABILITY_SCAN_INTERVAL_SECS", default_value = "5")]
    pub capability_scan_interval_secs: u64,

    /// Requeue delay after a successful reconcile, in seconds.
    #[arg(long, env = "REQUEUE_DELAY_SECS", default_value = "30")]
    pub requeue_delay_secs: u64,

    /// Requeue delay after a retryable error, in seconds.
    #[arg(long, env = "REQUEUE_DELAY_ERROR_SECS", default_value = "5")]
    pub requeue_delay_error_secs: u64,

    /// Timeout for Keycloak admin API calls, in seconds.
    #[arg(long, env = "KEYCLOAK_API_TIMEOUT_SECS", default_value = "10")]
    pub keycloak_api_timeout_secs: u64,

    /// HTTP port for health and metrics endpoints.
    #[arg(long, env = "HEALTH_PORT", default_value = "8080")]
    pub health_port: u16,
}

impl OperatorConfig {
    pub fn capability_scan_interval(&self) -> Duration {
        Duration::from_secs(self.capability_scan_interval_secs.max(1))
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_secs)
    }

    pub fn requeue_delay_error(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_error_secs)
    }

    pub fn keycloak_api_timeout(&self) -> Duration {
        Duration::from_secs(self.keycloak_api_timeout_secs)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            images: Images::default(),
            capability_scan_interval_secs: 5,
            requeue_delay_secs: 30,
            requeue_delay_error_secs: 5,
            keycloak_api_timeout_secs: 10,
            health_port: 8080,
        }
    }
}

/// Container images the operator deploys.
#[derive(Clone, Debug, Args, PartialEq, Eq)]
pub struct Images {
    #[arg(
        long = "keycloak-image",
        env = "RELATED_IMAGE_KEYCLOAK",
        default_value = "quay.io/keycloak/keycloak:9.0.2"
    )]
    pub keycloak: String,

    #[arg(
        long = "rhsso-image",
        env = "RELATED_IMAGE_RHSSO",
        default_value = "registry.redhat.io/rh-sso-7/sso74-openshift-rhel8:7.4"
    )]
    pub rhsso: String,

    #[arg(
        long = "postgresql-image",
        env = "RELATED_IMAGE_POSTGRESQL",
        default_value = "registry.access.redhat.com/rhscl/postgresql-10-rhel7:1"
    )]
    pub postgresql: String,

    #[arg(
        long = "backup-image",
        env = "RELATED_IMAGE_BACKUP",
        default_value = "quay.io/integreatly/backup-container:1.0.16"
    )]
    pub backup: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            keycloak: "quay.io/keycloak/keycloak:9.0.2".to_string(),
            rhsso: "registry.redhat.io/rh-sso-7/sso74-openshift-rhel8:7.4".to_string(),
            postgresql: "registry.access.redhat.com/rhscl/postgresql-10-rhel7:1".to_string(),
            backup: "quay.io/integreatly/backup-container:1.0.16".to_string(),
        }
    }
}

impl Images {
    /// Server image selected by the spec's profile.
    pub fn server_image(&self, spec: &KeycloakSpec) -> &str {
        if spec.is_rhsso() {
            &self.rhsso
        } else {
            &self.keycloak
        }
    }
}

/// Tag part of an image reference, or `latest` when none is given.
pub fn image_tag(image: &str) -> &str {
    let name = image.rsplit('/').next().unwrap_or(image);
    let name = name.split('@').next().unwrap_or(name);
    match name.split_once(':') {
        Some((_, tag)) if !tag.is_empty() => tag,
        _ => "latest",
    }
}
