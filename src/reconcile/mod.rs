//! Reconcilers.
//!
//! A reconciler is a pure function from an observed state snapshot and the
//! desired custom resource to an ordered [`DesiredClusterState`]. Nothing in
//! here performs I/O; the action runner applies the result.
//!
//! Admin API entities (realms, clients, users, groups) share one skeleton,
//! [`reconcile_admin_entity`]:
//!
//! 1. `Ping` the server first.
//! 2. On deletion, emit the inverse of creation when the entity exists and
//!    nothing else.
//! 3. Otherwise create when absent, or update and diff associations when
//!    present. Associations need the server-assigned id, so a freshly
//!    created entity gets them on the next cycle.
//! 4. Finally reconcile dependent Kubernetes objects.

pub mod backup;
pub mod client;
pub mod cluster;
pub mod group;
pub mod realm;
pub mod roles;
pub mod user;

use kube::Resource;
use kube::api::DynamicObject;

pub use backup::BackupReconciler;
pub use client::ClientReconciler;
pub use cluster::ClusterReconciler;
pub use group::GroupReconciler;
pub use realm::RealmReconciler;
pub use user::UserReconciler;

use crate::action::{ClusterAction, DesiredClusterState};
use crate::capability::CustomKind;
use crate::store::{Managed, ManagedResource};

/// Per-entity hooks for [`reconcile_admin_entity`].
pub trait AdminEntity {
    /// Entity as read from the admin API.
    type Observed;

    fn observed(&self) -> Option<&Self::Observed>;

    /// Whether the custom resource is being deleted.
    fn deleting(&self) -> bool;

    fn create(&self, desired: &mut DesiredClusterState);

    fn update(&self, observed: &Self::Observed, desired: &mut DesiredClusterState);

    /// Role mappings, memberships and other links hanging off the entity.
    fn associations(&self, _observed: &Self::Observed, _desired: &mut DesiredClusterState) {}

    fn delete(&self, observed: &Self::Observed, desired: &mut DesiredClusterState);

    /// Kubernetes objects derived from the entity.
    fn dependents(&self, _desired: &mut DesiredClusterState) {}
}

/// Run the shared create/update/delete skeleton for an admin API entity.
pub fn reconcile_admin_entity<E: AdminEntity>(entity: &E) -> DesiredClusterState {
    let mut desired = DesiredClusterState::new();
    desired.push(ClusterAction::Ping);

    if entity.deleting() {
        if let Some(observed) = entity.observed() {
            entity.delete(observed, &mut desired);
        }
        return desired;
    }

    match entity.observed() {
        None => entity.create(&mut desired),
        Some(observed) => {
            entity.update(observed, &mut desired);
            entity.associations(observed, &mut desired);
        }
    }
    entity.dependents(&mut desired);
    desired
}

/// Create `desired` when nothing is observed, else update the merged object.
pub fn create_or_update<T, F>(observed: Option<&T>, desired: T, merge: F) -> ClusterAction
where
    T: Managed,
    F: FnOnce(&T, T) -> T,
{
    match observed {
        None => ClusterAction::CreateResource(desired.into_managed()),
        Some(observed) => ClusterAction::UpdateResource(merge(observed, desired).into_managed()),
    }
}

/// [`create_or_update`] for optional kinds.
pub fn create_or_update_custom<F>(
    kind: CustomKind,
    observed: Option<&DynamicObject>,
    desired: DynamicObject,
    merge: F,
) -> ClusterAction
where
    F: FnOnce(&DynamicObject, DynamicObject) -> DynamicObject,
{
    match observed {
        None => ClusterAction::CreateResource(ManagedResource::Custom {
            kind,
            object: desired,
        }),
        Some(observed) => ClusterAction::UpdateResource(ManagedResource::Custom {
            kind,
            object: merge(observed, desired),
        }),
    }
}

/// Merge that only carries the observed resourceVersion.
pub fn carry_version<T: Resource>(observed: &T, mut desired: T) -> T {
    desired.meta_mut().resource_version = observed.meta().resource_version.clone();
    desired
}

/// Create `desired` only when nothing is observed.
pub fn create_if_absent<T: Managed>(observed: Option<&T>, desired: T) -> Option<ClusterAction> {
    observed
        .is_none()
        .then(|| ClusterAction::CreateResource(desired.into_managed()))
}
