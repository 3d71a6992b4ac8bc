//! Types shared by every Keycloak custom resource.
//!
//! Status phases, conditions, the secondary-resources ledger and the label
//! selector used to bind realms to servers and clients/users/groups to realms.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of every custom resource managed by the operator.
pub const API_GROUP: &str = "keycloak.org";

/// API version of every custom resource managed by the operator.
pub const API_VERSION: &str = "v1alpha1";

/// StatusPhase represents where a resource is in its reconcile cycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum StatusPhase {
    /// Initial state, nothing has been reconciled yet.
    #[default]
    Initialising,
    /// Actions were applied, the backend is converging.
    Reconciling,
    /// The last cycle applied every action and the resource is usable.
    Ready,
    /// The last cycle failed; see the status message.
    Failing,
}

impl std::fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusPhase::Initialising => write!(f, "Initialising"),
            StatusPhase::Reconciling => write!(f, "Reconciling"),
            StatusPhase::Ready => write!(f, "Ready"),
            StatusPhase::Failing => write!(f, "Failing"),
        }
    }
}

/// Condition describes the state of a resource at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }
}

/// Advisory ledger of the sub-resources observed for a resource, keyed by kind.
///
/// Written into status for operator visibility only; reconciliation never
/// reads it back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct SecondaryResources(pub BTreeMap<String, Vec<String>>);

impl SecondaryResources {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (kind, name) pair. Duplicates are ignored.
    pub fn add(&mut self, kind: &str, name: &str) {
        let names = self.0.entry(kind.to_string()).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    /// Names recorded for a kind.
    pub fn names(&self, kind: &str) -> &[String] {
        self.0.get(kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge another ledger into this one.
    pub fn merge(&mut self, other: &SecondaryResources) {
        for (kind, names) in &other.0 {
            for name in names {
                self.add(kind, name);
            }
        }
    }
}

/// Label selector used to bind resources together.
///
/// Mirrors the Kubernetes `LabelSelector` shape so manifests look familiar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorSpec {
    /// Exact label matches.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// A single set-based selector requirement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key the requirement applies to.
    pub key: String,
    /// One of In, NotIn, Exists, DoesNotExist.
    pub operator: String,
    /// Values for In and NotIn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelectorSpec {
    /// Render the selector in the string form accepted by list calls.
    pub fn to_selector_string(&self) -> String {
        let mut parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        for req in &self.match_expressions {
            let rendered = match req.operator.as_str() {
                "In" => format!("{} in ({})", req.key, req.values.join(",")),
                "NotIn" => format!("{} notin ({})", req.key, req.values.join(",")),
                "Exists" => req.key.clone(),
                "DoesNotExist" => format!("!{}", req.key),
                _ => continue,
            };
            parts.push(rendered);
        }

        parts.join(",")
    }

    /// Check whether a label set satisfies this selector.
    ///
    /// An empty selector matches nothing, so a missing selector never binds a
    /// resource to every server in the namespace.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if self.match_labels.is_empty() && self.match_expressions.is_empty() {
            return false;
        }

        let labels_ok = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));

        let expressions_ok = self.match_expressions.iter().all(|req| {
            let value = labels.get(&req.key);
            match req.operator.as_str() {
                "In" => value.is_some_and(|v| req.values.contains(v)),
                "NotIn" => value.is_none_or(|v| !req.values.contains(v)),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            }
        });

        labels_ok && expressions_ok
    }
}

/// Status shared by realms, clients, users, groups and backups.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: StatusPhase,

    /// Human-readable outcome of the last cycle.
    #[serde(default)]
    pub message: String,

    /// True once the last cycle applied every action.
    #[serde(default)]
    pub ready: bool,

    /// Sub-resources observed during the last read.
    #[serde(default, skip_serializing_if = "SecondaryResources::is_empty")]
    pub secondary_resources: SecondaryResources,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
