//! Prometheus and Grafana objects for a Keycloak server.
//!
//! Each object is an optional kind and is only reconciled once the
//! capability cache confirms the cluster serves it.

use kube::api::DynamicObject;
use serde_json::json;

use crate::capability::{GRAFANA_DASHBOARD, PROMETHEUS_RULE, SERVICE_MONITOR};
use crate::crd::Keycloak;
use crate::resources::common::{
    APPLICATION_NAME, KEYCLOAK_EXTERNAL_NAME, component_selector, custom_object,
};

/// Generate the ServiceMonitor scraping the server's metrics endpoint.
pub fn generate_service_monitor(keycloak: &Keycloak) -> DynamicObject {
    let mut monitor = custom_object(keycloak, SERVICE_MONITOR, KEYCLOAK_EXTERNAL_NAME);
    monitor.data = json!({
        "spec": {
            "selector": {
                "matchLabels": component_selector(APPLICATION_NAME),
            },
            "endpoints": [{
                "path": "/metrics",
                "port": "keycloak-monitoring",
            }],
        }
    });
    monitor
}

/// Generate the alerting rules for the server.
pub fn generate_prometheus_rule(keycloak: &Keycloak) -> DynamicObject {
    let mut rule = custom_object(keycloak, PROMETHEUS_RULE, KEYCLOAK_EXTERNAL_NAME);
    rule.data = json!({
        "spec": {
            "groups": [{
                "name": "general.rules",
                "rules": [
                    {
                        "alert": "KeycloakJavaHeapThresholdExceeded",
                        "expr": "100 * jvm_memory_bytes_used{area=\"heap\",namespace=\"$NAMESPACE\"} / jvm_memory_bytes_max{area=\"heap\",namespace=\"$NAMESPACE\"} > 90",
                        "for": "1m",
                        "labels": { "severity": "warning" },
                        "annotations": {
                            "message": "Heap memory usage of {{ $labels.pod }} is above 90%",
                        },
                    },
                    {
                        "alert": "KeycloakInstanceNotAvailable",
                        "expr": "(1 - absent(kube_pod_status_ready{namespace=\"$NAMESPACE\", condition=\"true\"} * on (pod) group_left (label_component) kube_pod_labels{label_component=\"keycloak\", namespace=\"$NAMESPACE\"})) == 0",
                        "for": "1m",
                        "labels": { "severity": "critical" },
                        "annotations": {
                            "message": "No Keycloak pod is ready",
                        },
                    },
                ],
            }],
        }
    });
    substitute_namespace(&mut rule.data, keycloak.metadata.namespace.as_deref().unwrap_or_default());
    rule
}

/// Generate the Grafana dashboard for the server.
pub fn generate_grafana_dashboard(keycloak: &Keycloak) -> DynamicObject {
    let mut dashboard = custom_object(keycloak, GRAFANA_DASHBOARD, KEYCLOAK_EXTERNAL_NAME);
    let namespace = keycloak.metadata.namespace.clone().unwrap_or_default();
    let model = json!({
        "title": format!("Keycloak ({})", namespace),
        "panels": [
            {
                "title": "Heap used",
                "type": "graph",
                "targets": [{
                    "expr": format!("sum(jvm_memory_bytes_used{{area=\"heap\",namespace=\"{}\"}})", namespace),
                }],
            },
            {
                "title": "Logins",
                "type": "graph",
                "targets": [{
                    "expr": format!("sum(rate(keycloak_logins{{namespace=\"{}\"}}[5m])) by (realm)", namespace),
                }],
            },
        ],
    });
    dashboard.data = json!({
        "spec": {
            "name": "keycloak.json",
            "json": model.to_string(),
        }
    });
    dashboard
}

fn substitute_namespace(value: &mut serde_json::Value, namespace: &str) {
    match value {
        serde_json::Value::String(s) => *s = s.replace("$NAMESPACE", namespace),
        serde_json::Value::Array(items) => {
            items
                .iter_mut()
                .for_each(|v| substitute_namespace(v, namespace));
        }
        serde_json::Value::Object(map) => {
            map.values_mut()
                .for_each(|v| substitute_namespace(v, namespace));
        }
        _ => {}
    }
}

/// Keep the observed resourceVersion of an optional-kind object.
pub fn merge_custom(observed: &DynamicObject, mut desired: DynamicObject) -> DynamicObject {
    desired.metadata.resource_version = observed.metadata.resource_version.clone();
    desired
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
    fn test_service_monitor_selects_keycloak_service() {
        let monitor = generate_service_monitor(&keycloak());
        assert_eq!(monitor.types.unwrap().kind, "ServiceMonitor");
        assert_eq!(
            monitor.data["spec"]["selector"]["matchLabels"]["component"],
            "keycloak"
        );
    }

    #[test]
    fn test_prometheus_rule_is_namespaced() {
        let rule = generate_prometheus_rule(&keycloak());
        let expr = rule.data["spec"]["groups"][0]["rules"][0]["expr"]
            .as_str()
            .unwrap();
        assert!(expr.contains("namespace=\"sso\""));
        assert!(!expr.contains("$NAMESPACE"));
    }

    #[test]
    fn test_grafana_dashboard_model_is_json() {
        let dashboard = generate_grafana_dashboard(&keycloak());
        let model: serde_json::Value =
            serde_json::from_str(dashboard.data["spec"]["json"].as_str().unwrap()).unwrap();
        assert_eq!(model["title"], "Keycloak (sso)");
    }
}
