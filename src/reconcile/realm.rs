//! Realm reconciler.
//!
//! Inline users are created with the realm. Each gets a credential secret
//! whose password is also the one sent to Keycloak, so the secret is
//! computed before the realm representation.

use k8s_openapi::api::core::v1::Secret;

use crate::action::{ClusterAction, DesiredClusterState};
use crate::crd::KeycloakRealm;
use crate::keycloak::types::{Credential, Realm};
use crate::reconcile::{AdminEntity, reconcile_admin_entity};
use crate::resources::secrets::{generate_user_secret, merge_secret, secret_string};
use crate::state::RealmState;
use crate::store::Managed;

pub struct RealmReconciler<'a> {
    cr: &'a KeycloakRealm,
    state: &'a RealmState,
    /// Credential secrets of inline users and whether each already exists.
    user_secrets: Vec<(Secret, bool)>,
}

impl<'a> RealmReconciler<'a> {
    pub fn new(cr: &'a KeycloakRealm, state: &'a RealmState) -> Self {
        let realm = cr.realm_name();
        let user_secrets = cr
            .spec
            .realm
            .users
            .iter()
            .map(|user| {
                let desired = generate_user_secret(cr, realm, user);
                match state.user_secrets.get(&user.username) {
                    Some(observed) => (merge_secret(observed, desired), true),
                    None => (desired, false),
                }
            })
            .collect();
        Self {
            cr,
            state,
            user_secrets,
        }
    }

    pub fn reconcile(&self) -> DesiredClusterState {
        if self.cr.spec.unmanaged {
            return DesiredClusterState::new();
        }
        reconcile_admin_entity(self)
    }

    /// Realm representation with each inline user's password taken from
    /// its credential secret.
    fn desired_realm(&self) -> Realm {
        let mut realm = self.cr.spec.realm.clone();
        for (user, (secret, _)) in realm.users.iter_mut().zip(&self.user_secrets) {
            if user.password().is_some() {
                continue;
            }
            if let Some(password) = secret_string(secret, "password") {
                user.credentials.push(Credential {
                    credential_type: Some("password".to_string()),
                    value: Some(password),
                    temporary: Some(false),
                });
            }
        }
        realm
    }

    fn configure(&self, desired: &mut DesiredClusterState) {
        if !self.cr.spec.realm_overrides.is_empty() {
            desired.push(ClusterAction::ConfigureRealm {
                realm: self.cr.realm_name().to_string(),
                overrides: self.cr.spec.realm_overrides.clone(),
            });
        }
    }
}

impl AdminEntity for RealmReconciler<'_> {
    type Observed = Realm;

    fn observed(&self) -> Option<&Realm> {
        self.state.realm.as_ref()
    }

    fn deleting(&self) -> bool {
        self.cr.metadata.deletion_timestamp.is_some()
    }

    fn create(&self, desired: &mut DesiredClusterState) {
        desired.push(ClusterAction::CreateRealm(self.desired_realm()));
        self.configure(desired);
    }

    // Keycloak only imports the realm representation on creation
    fn update(&self, _observed: &Realm, desired: &mut DesiredClusterState) {
        self.configure(desired);
    }

    fn delete(&self, observed: &Realm, desired: &mut DesiredClusterState) {
        desired.push(ClusterAction::DeleteRealm {
            realm: observed.realm.clone(),
        });
    }

    fn dependents(&self, desired: &mut DesiredClusterState) {
        for (secret, exists) in &self.user_secrets {
            let resource = secret.clone().into_managed();
            desired.push(if *exists {
                ClusterAction::UpdateResource(resource)
            } else {
                ClusterAction::CreateResource(resource)
            });
        }
    }
}
