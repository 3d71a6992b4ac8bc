//! Reconciliation loop for Keycloak servers.
//!
//! Reads the observed topology, builds the desired action list, lets the
//! migrator rewrite it and runs it against the resource store. Owned objects
//! carry owner references, so deletion is left to the garbage collector.

use std::sync::Arc;
use std::time::Instant;

use kube::{Api, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::action::ClusterActionRunner;
use crate::config::{Images, image_tag};
use crate::controller::common::patch_status;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{became_ready, phase_conditions};
use crate::crd::{Keycloak, KeycloakStatus, StatusPhase};
use crate::keycloak::auth::{admin_secret_name, server_url};
use crate::reconcile::ClusterReconciler;
use crate::resources::external_access::{ingress_host, route_host};
use crate::state::ClusterState;

const KIND: &str = "Keycloak";

/// Reconcile a Keycloak server
pub async fn reconcile(obj: Arc<Keycloak>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling Keycloak");

    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "Keycloak is being deleted, owned resources are garbage collected");
        return Ok(Action::await_change());
    }

    let api: Api<Keycloak> = Api::namespaced(ctx.client.clone(), &namespace);

    match cycle(&obj, &ctx).await {
        Ok(status) => {
            if became_ready(obj.status.as_ref().map(|s| s.conditions.as_slice()), status.phase) {
                ctx.publish_normal_event(obj.as_ref(), "Ready", "Reconcile", None)
                    .await;
            }
            let phase = status.phase;
            patch_status(&api, &name, &status).await?;
            ctx.record_reconcile(KIND, &namespace, &name, start_time);
            info!(name = %name, phase = %phase, "Reconciled Keycloak");
            Ok(Action::requeue(ctx.config.requeue_delay()))
        }
        Err(e) => {
            mark_failing(&api, &obj, &ctx, &e).await;
            Err(e)
        }
    }
}

async fn cycle(keycloak: &Keycloak, ctx: &Context) -> Result<KeycloakStatus> {
    let state = ClusterState::read(keycloak, ctx.store.as_ref(), ctx.capabilities.as_ref()).await?;

    let desired = ClusterReconciler::new(&ctx.config.images, ctx.capabilities.as_ref())
        .reconcile(keycloak, &state);
    let desired = ctx.migrator.migrate(keycloak, &state, desired)?;
    debug!(actions = desired.len(), "Running server actions");

    ClusterActionRunner::new(ctx.store.clone())
        .with_health(ctx.health_state.clone())
        .run_all(&desired)
        .await?;

    let status = server_status(keycloak, &state, &ctx.config.images);
    if let Some(health) = &ctx.health_state {
        health.metrics.set_instance_replicas(
            &keycloak.namespace().unwrap_or_default(),
            &keycloak.name_any(),
            i64::from(keycloak.spec.instances),
            i64::from(ready_replicas(&state)),
        );
    }
    Ok(status)
}

fn ready_replicas(state: &ClusterState) -> i32 {
    state
        .statefulset
        .as_ref()
        .and_then(|sts| sts.status.as_ref())
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

fn external_url(keycloak: &Keycloak, state: &ClusterState) -> String {
    if keycloak.spec.external.enabled {
        return keycloak.spec.external.url.clone().unwrap_or_default();
    }
    state
        .route
        .as_ref()
        .and_then(route_host)
        .or_else(|| state.ingress.as_ref().and_then(ingress_host))
        .map(|host| format!("https://{}", host))
        .unwrap_or_default()
}

/// Status of a server after a successful cycle.
///
/// Deployed servers are `Ready` once every requested replica is ready;
/// servers the operator does not deploy are `Ready` as soon as the cycle
/// succeeds.
pub fn server_status(keycloak: &Keycloak, state: &ClusterState, images: &Images) -> KeycloakStatus {
    let generation = keycloak.metadata.generation;
    let ready = ready_replicas(state);
    let (phase, message) = if !keycloak.spec.manages_topology() {
        (StatusPhase::Ready, String::new())
    } else if ready >= keycloak.spec.instances {
        (StatusPhase::Ready, String::new())
    } else {
        (
            StatusPhase::Reconciling,
            format!("{}/{} instances ready", ready, keycloak.spec.instances),
        )
    };

    let image = state
        .running_image()
        .unwrap_or_else(|| images.server_image(&keycloak.spec));

    KeycloakStatus {
        phase,
        ready: phase == StatusPhase::Ready,
        version: image_tag(image).to_string(),
        internal_url: server_url(keycloak)
            .map(|(url, _)| url.to_string())
            .unwrap_or_default(),
        external_url: external_url(keycloak, state),
        credential_secret: admin_secret_name(&keycloak.name_any()),
        secondary_resources: state.secondary_resources.clone(),
        observed_generation: generation,
        conditions: phase_conditions(phase, &message, generation),
        message,
    }
}

/// Record a failed cycle in status and as a Warning event.
async fn mark_failing(api: &Api<Keycloak>, keycloak: &Keycloak, ctx: &Context, error: &Error) {
    let name = keycloak.name_any();
    let message = error.to_string();
    let generation = keycloak.metadata.generation;
    let status = KeycloakStatus {
        phase: StatusPhase::Failing,
        ready: false,
        conditions: phase_conditions(StatusPhase::Failing, &message, generation),
        message: message.clone(),
        observed_generation: generation,
        ..keycloak.status.clone().unwrap_or_default()
    };
    if let Err(e) = patch_status(api, &name, &status).await {
        warn!(name = %name, error = %e, "Failed to record failing status");
    }
    ctx.publish_warning_event(keycloak, "ReconcileFailed", "Reconcile", Some(message))
        .await;
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Keycloak>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    ctx.record_error(KIND, &namespace, &name);

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
    } else if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    error.next_action(ctx.config.requeue_delay_error())
}
