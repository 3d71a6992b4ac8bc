//! Reconciliation loop shared by realms, clients, users, groups and backups.
//!
//! Each kind implements [`ManagedCustomResource::apply`], one full cycle
//! against every target its selector resolves to. This module wraps it with
//! the finalizer protocol, status updates, events and metrics.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Resource, ResourceExt, runtime::controller::Action};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::controller::common::{FINALIZER, add_finalizer, patch_status, remove_finalizer};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{became_ready, resource_status};
use crate::crd::{ResourceStatus, SecondaryResources, StatusPhase};

/// A custom resource reconciled by [`reconcile`].
#[async_trait]
pub trait ManagedCustomResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
    /// Kind name used in logs and metrics.
    const KIND: &'static str;

    /// Whether deletion must run a cycle before the object goes away.
    const FINALIZED: bool;

    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// Run one cycle, returning the sub-resources observed along the way.
    async fn apply(&self, ctx: &Context) -> Result<SecondaryResources>;
}

/// Reconcile one custom resource
pub async fn reconcile<K: ManagedCustomResource>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);

    debug!(kind = K::KIND, name = %name, namespace = %namespace, "Reconciling");

    if obj.meta().deletion_timestamp.is_some() {
        return handle_deletion(&api, &obj, &ctx).await;
    }

    if K::FINALIZED && !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(kind = K::KIND, name = %name, "Adding finalizer");
        add_finalizer(&api, &name, FINALIZER).await?;
        return Ok(Action::requeue(std::time::Duration::from_secs(1)));
    }

    match obj.apply(&ctx).await {
        Ok(ledger) => {
            let generation = obj.meta().generation;
            let status = resource_status(StatusPhase::Ready, "", ledger, generation);
            let previous = obj.resource_status().map(|s| s.conditions.as_slice());
            if became_ready(previous, status.phase) {
                ctx.publish_normal_event(obj.as_ref(), "Ready", "Reconcile", None)
                    .await;
            }
            patch_status(&api, &name, &status).await?;
            ctx.record_reconcile(K::KIND, &namespace, &name, start_time);
            info!(kind = K::KIND, name = %name, "Reconciled");
            Ok(Action::requeue(ctx.config.requeue_delay()))
        }
        Err(e) => {
            mark_failing(&api, obj.as_ref(), &ctx, &e).await;
            Err(e)
        }
    }
}

/// Run the deletion cycle, then release the object.
async fn handle_deletion<K: ManagedCustomResource>(
    api: &Api<K>,
    obj: &K,
    ctx: &Context,
) -> Result<Action> {
    let name = obj.name_any();
    if !K::FINALIZED || !obj.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }

    info!(kind = K::KIND, name = %name, "Handling deletion");
    if let Err(e) = obj.apply(ctx).await {
        mark_failing(api, obj, ctx, &e).await;
        return Err(e);
    }
    ctx.publish_normal_event(obj, "Deleted", "Delete", None).await;
    remove_finalizer(api, &name, FINALIZER).await?;
    Ok(Action::await_change())
}

/// Record a failed cycle in status and as a Warning event.
async fn mark_failing<K: ManagedCustomResource>(api: &Api<K>, obj: &K, ctx: &Context, error: &Error) {
    let name = obj.name_any();
    let message = error.to_string();
    let ledger = obj
        .resource_status()
        .map(|s| s.secondary_resources.clone())
        .unwrap_or_default();
    let status = resource_status(StatusPhase::Failing, message.clone(), ledger, obj.meta().generation);
    if let Err(e) = patch_status(api, &name, &status).await {
        warn!(kind = K::KIND, name = %name, error = %e, "Failed to record failing status");
    }
    ctx.publish_warning_event(obj, "ReconcileFailed", "Reconcile", Some(message))
        .await;
}

/// Error policy for the controller
pub fn error_policy<K: ManagedCustomResource>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    ctx.record_error(K::KIND, &namespace, &name);

    if error.is_not_found() {
        debug!(kind = K::KIND, name = %name, "Resource not found (likely deleted)");
    } else if error.is_retryable() {
        warn!(kind = K::KIND, name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(kind = K::KIND, name = %name, error = %error, "Non-retryable error");
    }
    error.next_action(ctx.config.requeue_delay_error())
}

/// Targets of a cycle, or an error when there are none.
///
/// A resource being deleted has nothing to clean up when its selector no
/// longer matches anything, so an empty target list is fine then.
pub fn require_targets<T>(targets: Vec<T>, deleting: bool, what: &str) -> Result<Vec<T>> {
    if targets.is_empty() && !deleting {
        return Err(Error::Transient(format!("no {} match the selector", what)));
    }
    Ok(targets)
}
