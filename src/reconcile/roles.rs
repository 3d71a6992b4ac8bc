//! Set differences between desired names and observed memberships.
//!
//! Used for role mappings, default client scopes and group membership alike:
//! grant what is desired, available and not yet held; revoke what is held
//! but no longer desired. Desired names that are neither available nor held
//! are skipped.

use std::collections::{BTreeMap, BTreeSet};

use crate::action::{ClusterAction, RoleAssignment};
use crate::keycloak::{RoleHolder, RoleScope};
use crate::keycloak::types::{ClientScope, Group, Role};
use crate::state::{ClientRoleMappings, RoleMappings};

/// Something identified by name in the admin API.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Role {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ClientScope {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Group {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Items to grant and to revoke.
#[derive(Clone, Debug, PartialEq)]
pub struct Diff<T> {
    pub add: Vec<T>,
    pub remove: Vec<T>,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Compute what to grant and revoke so that exactly `desired` is held.
pub fn diff<T: Named + Clone>(desired: &[String], available: &[T], assigned: &[T]) -> Diff<T> {
    let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
    let held: BTreeSet<&str> = assigned.iter().map(Named::name).collect();

    let mut seen = BTreeSet::new();
    let add = available
        .iter()
        .filter(|item| desired.contains(item.name()) && !held.contains(item.name()))
        .filter(|item| seen.insert(item.name().to_string()))
        .cloned()
        .collect();

    let remove = assigned
        .iter()
        .filter(|item| !desired.contains(item.name()))
        .cloned()
        .collect();

    Diff { add, remove }
}

/// Role assignment actions bringing one mapping to `desired`.
pub fn role_actions(
    realm: &str,
    holder: &RoleHolder,
    scope: &RoleScope,
    desired: &[String],
    mappings: &RoleMappings,
) -> Vec<ClusterAction> {
    let Diff { add, remove } = diff(desired, &mappings.available, &mappings.assigned);
    let assignment = |role: Role| RoleAssignment {
        realm: realm.to_string(),
        holder: holder.clone(),
        scope: scope.clone(),
        role,
    };

    add.into_iter()
        .map(|role| ClusterAction::AssignRole(assignment(role)))
        .chain(
            remove
                .into_iter()
                .map(|role| ClusterAction::RemoveRole(assignment(role))),
        )
        .collect()
}

/// Role assignment actions for every client named in `desired`.
///
/// Clients without observed mappings are skipped; they did not exist when
/// the state was read.
pub fn client_role_actions(
    realm: &str,
    holder: &RoleHolder,
    desired: &BTreeMap<String, Vec<String>>,
    observed: &BTreeMap<String, ClientRoleMappings>,
) -> Vec<ClusterAction> {
    desired
        .iter()
        .filter_map(|(client_id, roles)| {
            observed.get(client_id).map(|mapping| {
                role_actions(realm, holder, &mapping.scope, roles, &mapping.mappings)
            })
        })
        .flatten()
        .collect()
}
