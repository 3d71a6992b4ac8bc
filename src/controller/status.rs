//! Status written back after each reconcile cycle.
//!
//! Every resource carries the same three conditions, derived from its phase,
//! so `kubectl wait --for=condition=Ready` works on all of them.

use crate::crd::{Condition, ResourceStatus, SecondaryResources, StatusPhase};

/// Whether the condition of a type is present and true.
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Ready, Progressing and Degraded conditions for a phase.
pub fn phase_conditions(phase: StatusPhase, message: &str, generation: Option<i64>) -> Vec<Condition> {
    let reason = phase.to_string();
    let progressing = matches!(phase, StatusPhase::Initialising | StatusPhase::Reconciling);
    vec![
        Condition::ready(phase == StatusPhase::Ready, &reason, message, generation),
        Condition::progressing(progressing, &reason, message, generation),
        Condition::degraded(phase == StatusPhase::Failing, &reason, message, generation),
    ]
}

/// Status written after a cycle.
///
/// `ready` reflects whether every action of the cycle was applied, which is
/// true for every phase except `Failing`.
pub fn resource_status(
    phase: StatusPhase,
    message: impl Into<String>,
    secondary_resources: SecondaryResources,
    generation: Option<i64>,
) -> ResourceStatus {
    let message = message.into();
    ResourceStatus {
        phase,
        ready: phase != StatusPhase::Failing,
        conditions: phase_conditions(phase, &message, generation),
        message,
        secondary_resources,
        observed_generation: generation,
    }
}

/// Whether a status update moves a resource into `Ready`.
pub fn became_ready(previous: Option<&[Condition]>, next: StatusPhase) -> bool {
    next == StatusPhase::Ready && !previous.is_some_and(|c| is_condition_true(c, "Ready"))
}
