//! Group reconciler.

use crate::action::{ClusterAction, DesiredClusterState};
use crate::crd::KeycloakGroup;
use crate::keycloak::types::Group;
use crate::keycloak::{RoleHolder, RoleScope};
use crate::reconcile::roles::{client_role_actions, role_actions};
use crate::reconcile::{AdminEntity, reconcile_admin_entity};
use crate::state::GroupState;

pub struct GroupReconciler<'a> {
    cr: &'a KeycloakGroup,
    state: &'a GroupState,
    realm: &'a str,
}

impl<'a> GroupReconciler<'a> {
    pub fn new(cr: &'a KeycloakGroup, state: &'a GroupState, realm: &'a str) -> Self {
        Self { cr, state, realm }
    }

    pub fn reconcile(&self) -> DesiredClusterState {
        reconcile_admin_entity(self)
    }
}

impl AdminEntity for GroupReconciler<'_> {
    type Observed = Group;

    fn observed(&self) -> Option<&Group> {
        self.state.group.as_ref()
    }

    fn deleting(&self) -> bool {
        self.cr.metadata.deletion_timestamp.is_some()
    }

    fn create(&self, desired: &mut DesiredClusterState) {
        desired.push(ClusterAction::CreateGroup {
            realm: self.realm.to_string(),
            group: self.cr.spec.group.clone(),
        });
    }

    fn update(&self, observed: &Group, desired: &mut DesiredClusterState) {
        desired.push(ClusterAction::UpdateGroup {
            realm: self.realm.to_string(),
            group: Group {
                id: observed.id.clone(),
                ..self.cr.spec.group.clone()
            },
        });
    }

    fn associations(&self, observed: &Group, desired: &mut DesiredClusterState) {
        let Some(id) = observed.id.clone() else {
            return;
        };
        let holder = RoleHolder::Group(id);
        let spec = &self.cr.spec.group;
        desired.extend(role_actions(
            self.realm,
            &holder,
            &RoleScope::Realm,
            &spec.realm_roles,
            &self.state.realm_roles,
        ));
        desired.extend(client_role_actions(
            self.realm,
            &holder,
            &spec.client_roles,
            &self.state.client_roles,
        ));
    }

    fn delete(&self, observed: &Group, desired: &mut DesiredClusterState) {
        if let Some(id) = observed.id.clone() {
            desired.push(ClusterAction::DeleteGroup {
                realm: self.realm.to_string(),
                id,
                name: observed.name.clone(),
            });
        }
    }
}
