//! Client reconciler.

use crate::action::{ClusterAction, DesiredClusterState};
use crate::crd::KeycloakClient;
use crate::keycloak::types::{Client, Role};
use crate::keycloak::{RoleHolder, RoleScope};
use crate::reconcile::roles::{Diff, client_role_actions, diff, role_actions};
use crate::reconcile::{AdminEntity, carry_version, create_or_update, reconcile_admin_entity};
use crate::resources::secrets::generate_client_secret;
use crate::state::ClientState;

pub struct ClientReconciler<'a> {
    cr: &'a KeycloakClient,
    state: &'a ClientState,
    realm: &'a str,
}

impl<'a> ClientReconciler<'a> {
    pub fn new(cr: &'a KeycloakClient, state: &'a ClientState, realm: &'a str) -> Self {
        Self { cr, state, realm }
    }

    pub fn reconcile(&self) -> DesiredClusterState {
        reconcile_admin_entity(self)
    }

    fn role_actions(&self, id: &str, desired: &mut DesiredClusterState) {
        let observed = &self.state.roles;
        for role in &self.cr.spec.roles {
            match observed.iter().find(|r| r.name == role.name) {
                None => {
                    desired.push(ClusterAction::CreateClientRole {
                        realm: self.realm.to_string(),
                        client: id.to_string(),
                        role: role.clone(),
                    });
                }
                Some(existing) if role_changed(existing, role) => {
                    desired.push(ClusterAction::UpdateClientRole {
                        realm: self.realm.to_string(),
                        client: id.to_string(),
                        role: Role {
                            id: existing.id.clone(),
                            ..role.clone()
                        },
                    });
                }
                Some(_) => {}
            }
        }

        for role in observed {
            if !self.cr.spec.roles.iter().any(|r| r.name == role.name) {
                desired.push(ClusterAction::DeleteClientRole {
                    realm: self.realm.to_string(),
                    client: id.to_string(),
                    name: role.name.clone(),
                });
            }
        }
    }

    fn scope_actions(&self, id: &str, desired: &mut DesiredClusterState) {
        let wanted = &self.cr.spec.client.default_client_scopes;
        // An empty list leaves the server defaults in place
        if wanted.is_empty() {
            return;
        }
        let Diff { add, remove } = diff(
            wanted,
            &self.state.available_client_scopes,
            &self.state.default_client_scopes,
        );
        desired.extend(add.into_iter().map(|scope| ClusterAction::AddDefaultClientScope {
            realm: self.realm.to_string(),
            client: id.to_string(),
            scope,
        }));
        desired.extend(remove.into_iter().map(|scope| {
            ClusterAction::RemoveDefaultClientScope {
                realm: self.realm.to_string(),
                client: id.to_string(),
                scope,
            }
        }));
    }

    fn service_account_actions(&self, desired: &mut DesiredClusterState) {
        let Some(user_id) = self
            .state
            .service_account_user
            .as_ref()
            .and_then(|u| u.id.clone())
        else {
            return;
        };
        let holder = RoleHolder::User(user_id);
        desired.extend(role_actions(
            self.realm,
            &holder,
            &RoleScope::Realm,
            &self.cr.spec.service_account_realm_roles,
            &self.state.service_account_realm_roles,
        ));
        desired.extend(client_role_actions(
            self.realm,
            &holder,
            &self.cr.spec.service_account_client_roles,
            &self.state.service_account_client_roles,
        ));
    }
}

fn role_changed(observed: &Role, desired: &Role) -> bool {
    (desired.description.is_some() && desired.description != observed.description)
        || (desired.composite.is_some() && desired.composite != observed.composite)
}

impl AdminEntity for ClientReconciler<'_> {
    type Observed = Client;

    fn observed(&self) -> Option<&Client> {
        self.state.client.as_ref()
    }

    fn deleting(&self) -> bool {
        self.cr.metadata.deletion_timestamp.is_some()
    }

    fn create(&self, desired: &mut DesiredClusterState) {
        desired.push(ClusterAction::CreateClient {
            realm: self.realm.to_string(),
            client: self.cr.spec.client.clone(),
        });
    }

    fn update(&self, observed: &Client, desired: &mut DesiredClusterState) {
        desired.push(ClusterAction::UpdateClient {
            realm: self.realm.to_string(),
            client: Client {
                id: observed.id.clone(),
                ..self.cr.spec.client.clone()
            },
        });
    }

    fn associations(&self, observed: &Client, desired: &mut DesiredClusterState) {
        let Some(id) = observed.id.as_deref() else {
            return;
        };
        self.role_actions(id, desired);
        self.scope_actions(id, desired);
        self.service_account_actions(desired);
    }

    fn delete(&self, observed: &Client, desired: &mut DesiredClusterState) {
        if let Some(id) = observed.id.clone() {
            desired.push(ClusterAction::DeleteClient {
                realm: self.realm.to_string(),
                id,
                client_id: observed.client_id.clone(),
            });
        }
    }

    fn dependents(&self, desired: &mut DesiredClusterState) {
        if let Some(value) = self.state.client_secret.as_deref() {
            let secret = generate_client_secret(self.cr, &self.cr.spec.client.client_id, value);
            desired.push(create_or_update(
                self.state.secret.as_ref(),
                secret,
                carry_version,
            ));
        }
    }
}
