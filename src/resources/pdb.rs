//! PodDisruptionBudget generation for Keycloak servers.
//!
//! Keeps at most one server pod down during voluntary disruptions such as
//! node drains.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::Keycloak;
use crate::resources::common::{
    APPLICATION_NAME, KEYCLOAK_EXTERNAL_NAME, component_selector, keycloak_meta,
};

/// Generate a PodDisruptionBudget for a Keycloak server.
pub fn generate_pod_disruption_budget(keycloak: &Keycloak) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: keycloak_meta(keycloak, KEYCLOAK_EXTERNAL_NAME, APPLICATION_NAME),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(component_selector(APPLICATION_NAME)),
                ..Default::default()
            }),
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

    #[test]
    fn test_generate_pdb() {
        let mut kc = Keycloak::new("example", KeycloakSpec::default());
        kc.metadata.namespace = Some("sso".to_string());
        let pdb = generate_pod_disruption_budget(&kc);

        assert_eq!(pdb.metadata.name.as_deref(), Some("keycloak"));
        assert_eq!(pdb.metadata.namespace.as_deref(), Some("sso"));

        let spec = pdb.spec.unwrap();
        assert_eq!(spec.max_unavailable, Some(IntOrString::Int(1)));
        let labels = spec.selector.unwrap().match_labels.unwrap();
        assert_eq!(labels.get("component"), Some(&"keycloak".to_string()));
    }
}
