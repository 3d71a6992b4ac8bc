//! User reconciler.

use k8s_openapi::api::core::v1::Secret;

use crate::action::{ClusterAction, DesiredClusterState};
use crate::crd::KeycloakUser;
use crate::keycloak::types::{Credential, User};
use crate::keycloak::{RoleHolder, RoleScope};
use crate::reconcile::roles::{Diff, client_role_actions, diff, role_actions};
use crate::reconcile::{AdminEntity, create_or_update, reconcile_admin_entity};
use crate::resources::secrets::{generate_user_secret, merge_secret, secret_string};
use crate::state::UserState;

pub struct UserReconciler<'a> {
    cr: &'a KeycloakUser,
    state: &'a UserState,
    realm: &'a str,
    /// Credential secret, keeping the observed password when there is one.
    secret: Secret,
}

impl<'a> UserReconciler<'a> {
    pub fn new(cr: &'a KeycloakUser, state: &'a UserState, realm: &'a str) -> Self {
        let desired = generate_user_secret(cr, realm, &cr.spec.user);
        let secret = match &state.secret {
            Some(observed) => merge_secret(observed, desired),
            None => desired,
        };
        Self {
            cr,
            state,
            realm,
            secret,
        }
    }

    pub fn reconcile(&self) -> DesiredClusterState {
        reconcile_admin_entity(self)
    }

    fn group_actions(&self, user_id: &str, desired: &mut DesiredClusterState) {
        let Diff { add, remove } = diff(
            &self.cr.spec.user.groups,
            &self.state.available_groups,
            &self.state.groups,
        );
        desired.extend(add.into_iter().map(|group| ClusterAction::AddUserToGroup {
            realm: self.realm.to_string(),
            user_id: user_id.to_string(),
            group,
        }));
        desired.extend(remove.into_iter().map(|group| ClusterAction::RemoveUserFromGroup {
            realm: self.realm.to_string(),
            user_id: user_id.to_string(),
            group,
        }));
    }
}

impl AdminEntity for UserReconciler<'_> {
    type Observed = User;

    fn observed(&self) -> Option<&User> {
        self.state.user.as_ref()
    }

    fn deleting(&self) -> bool {
        self.cr.metadata.deletion_timestamp.is_some()
    }

    fn create(&self, desired: &mut DesiredClusterState) {
        let mut user = self.cr.spec.user.clone();
        if user.password().is_none() {
            if let Some(password) = secret_string(&self.secret, "password") {
                user.credentials.push(Credential {
                    credential_type: Some("password".to_string()),
                    value: Some(password),
                    temporary: Some(false),
                });
            }
        }
        desired.push(ClusterAction::CreateUser {
            realm: self.realm.to_string(),
            user,
        });
    }

    // Credentials are only set on creation so password changes made in
    // Keycloak are not reverted
    fn update(&self, observed: &User, desired: &mut DesiredClusterState) {
        desired.push(ClusterAction::UpdateUser {
            realm: self.realm.to_string(),
            user: User {
                id: observed.id.clone(),
                credentials: Vec::new(),
                ..self.cr.spec.user.clone()
            },
        });
    }

    fn associations(&self, observed: &User, desired: &mut DesiredClusterState) {
        let Some(id) = observed.id.clone() else {
            return;
        };
        let spec = &self.cr.spec.user;
        let holder = RoleHolder::User(id.clone());
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
        self.group_actions(&id, desired);
    }

    fn delete(&self, observed: &User, desired: &mut DesiredClusterState) {
        if let Some(id) = observed.id.clone() {
            desired.push(ClusterAction::DeleteUser {
                realm: self.realm.to_string(),
                id,
                username: observed.username.clone(),
            });
        }
    }

    fn dependents(&self, desired: &mut DesiredClusterState) {
        desired.push(create_or_update(
            self.state.secret.as_ref(),
            self.secret.clone(),
            |_, merged| merged,
        ));
    }
}
