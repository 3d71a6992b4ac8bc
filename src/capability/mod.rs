//! Process-wide record of which optional resource kinds the cluster serves.
//!
//! Keys are three-valued: unknown (never scanned), `true` (present and
//! watched) and `false` (absent, or watch registration failed). Readers and
//! reconcilers only act on a kind when [`CapabilityStore::is_present`] holds,
//! so unknown gates exactly like `false`.

pub mod detector;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use kube::api::{ApiResource, GroupVersionKind};

pub use detector::{CapabilityDetector, KindDiscovery, KubeKindDiscovery, KubeWatchRegistrar, WatchRegistrar};

/// An optional resource kind that is not part of core Kubernetes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CustomKind {
    /// Capability key recorded in the cache.
    pub key: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl CustomKind {
    /// `group/version` as used by API discovery.
    pub fn group_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    /// Dynamic API resource for this kind.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(self.group, self.version, self.kind),
            self.plural,
        )
    }
}

/// OpenShift Route, used for external access when available.
pub const ROUTE: CustomKind = CustomKind {
    key: "Route",
    group: "route.openshift.io",
    version: "v1",
    kind: "Route",
    plural: "routes",
};

/// Prometheus operator ServiceMonitor.
pub const SERVICE_MONITOR: CustomKind = CustomKind {
    key: "ServiceMonitor",
    group: "monitoring.coreos.com",
    version: "v1",
    kind: "ServiceMonitor",
    plural: "servicemonitors",
};

/// Prometheus operator PrometheusRule.
pub const PROMETHEUS_RULE: CustomKind = CustomKind {
    key: "PrometheusRule",
    group: "monitoring.coreos.com",
    version: "v1",
    kind: "PrometheusRule",
    plural: "prometheusrules",
};

/// Grafana operator dashboard.
pub const GRAFANA_DASHBOARD: CustomKind = CustomKind {
    key: "GrafanaDashboard",
    group: "integreatly.org",
    version: "v1alpha1",
    kind: "GrafanaDashboard",
    plural: "grafanadashboards",
};

/// Every kind the detector looks for.
pub const OPTIONAL_KINDS: [CustomKind; 4] = [ROUTE, SERVICE_MONITOR, PROMETHEUS_RULE, GRAFANA_DASHBOARD];

/// Get/set access to capability flags.
pub trait CapabilityStore: Send + Sync {
    /// Cached value, `None` when the key was never recorded.
    fn get(&self, key: &str) -> Option<bool>;

    fn set(&self, key: &str, present: bool);

    /// Whether the kind is confirmed present.
    fn is_present(&self, key: &str) -> bool {
        self.get(key) == Some(true)
    }
}

/// In-memory capability cache shared by the detector and every controller.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: RwLock<HashMap<String, bool>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded keys, for metrics and logging.
    pub fn entries(&self) -> Vec<(String, bool)> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = guard.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort();
        entries
    }
}

impl CapabilityStore for CapabilityCache {
    fn get(&self, key: &str) -> Option<bool> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn set(&self, key: &str, present: bool) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), present);
    }
}
