//! Units of convergent work and the ordered lists reconcilers produce.
//!
//! Every mutation the operator performs is a [`ClusterAction`] variant. A
//! reconciler returns a [`DesiredClusterState`]; the order of its actions is
//! the order they run in, so dependencies always come first.

pub mod runner;

use std::collections::BTreeMap;

use tracing::debug;

pub use runner::ClusterActionRunner;

use crate::controller::error::{Error, Result};
use crate::crd::RedirectorIdentityProviderOverride;
use crate::keycloak::types::{AuthenticatorConfig, Client, ClientScope, Group, Realm, Role, User};
use crate::keycloak::{RoleHolder, RoleScope};
use crate::store::{ManagedResource, ResourceRef};

/// Provider id of the execution that redirects the browser flow to an IdP.
pub const IDP_REDIRECTOR_PROVIDER: &str = "identity-provider-redirector";

/// One role to grant or revoke.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleAssignment {
    pub realm: String,
    pub holder: RoleHolder,
    pub scope: RoleScope,
    pub role: Role,
}

/// A single unit of work against the resource store or the admin API.
#[derive(Clone, Debug)]
pub enum ClusterAction {
    CreateResource(ManagedResource),
    UpdateResource(ManagedResource),
    DeleteResource(ResourceRef),
    /// Verify the admin API answers before mutating anything.
    Ping,
    CreateRealm(Realm),
    DeleteRealm {
        realm: String,
    },
    /// Point the browser flow's redirector at the configured identity providers.
    ConfigureRealm {
        realm: String,
        overrides: Vec<RedirectorIdentityProviderOverride>,
    },
    CreateClient {
        realm: String,
        client: Client,
    },
    UpdateClient {
        realm: String,
        client: Client,
    },
    DeleteClient {
        realm: String,
        id: String,
        client_id: String,
    },
    CreateClientRole {
        realm: String,
        client: String,
        role: Role,
    },
    UpdateClientRole {
        realm: String,
        client: String,
        role: Role,
    },
    DeleteClientRole {
        realm: String,
        client: String,
        name: String,
    },
    AddDefaultClientScope {
        realm: String,
        client: String,
        scope: ClientScope,
    },
    RemoveDefaultClientScope {
        realm: String,
        client: String,
        scope: ClientScope,
    },
    CreateUser {
        realm: String,
        user: User,
    },
    UpdateUser {
        realm: String,
        user: User,
    },
    DeleteUser {
        realm: String,
        id: String,
        username: String,
    },
    AddUserToGroup {
        realm: String,
        user_id: String,
        group: Group,
    },
    RemoveUserFromGroup {
        realm: String,
        user_id: String,
        group: Group,
    },
    CreateGroup {
        realm: String,
        group: Group,
    },
    UpdateGroup {
        realm: String,
        group: Group,
    },
    DeleteGroup {
        realm: String,
        id: String,
        name: String,
    },
    AssignRole(RoleAssignment),
    RemoveRole(RoleAssignment),
}

fn id_of<'a>(id: &'a Option<String>, what: &str, name: &str) -> Result<&'a str> {
    id.as_deref()
        .ok_or_else(|| Error::MissingField(format!("id of {} {}", what, name)))
}

impl ClusterAction {
    /// Variant name, used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            ClusterAction::CreateResource(_) => "CreateResource",
            ClusterAction::UpdateResource(_) => "UpdateResource",
            ClusterAction::DeleteResource(_) => "DeleteResource",
            ClusterAction::Ping => "Ping",
            ClusterAction::CreateRealm(_) => "CreateRealm",
            ClusterAction::DeleteRealm { .. } => "DeleteRealm",
            ClusterAction::ConfigureRealm { .. } => "ConfigureRealm",
            ClusterAction::CreateClient { .. } => "CreateClient",
            ClusterAction::UpdateClient { .. } => "UpdateClient",
            ClusterAction::DeleteClient { .. } => "DeleteClient",
            ClusterAction::CreateClientRole { .. } => "CreateClientRole",
            ClusterAction::UpdateClientRole { .. } => "UpdateClientRole",
            ClusterAction::DeleteClientRole { .. } => "DeleteClientRole",
            ClusterAction::AddDefaultClientScope { .. } => "AddDefaultClientScope",
            ClusterAction::RemoveDefaultClientScope { .. } => "RemoveDefaultClientScope",
            ClusterAction::CreateUser { .. } => "CreateUser",
            ClusterAction::UpdateUser { .. } => "UpdateUser",
            ClusterAction::DeleteUser { .. } => "DeleteUser",
            ClusterAction::AddUserToGroup { .. } => "AddUserToGroup",
            ClusterAction::RemoveUserFromGroup { .. } => "RemoveUserFromGroup",
            ClusterAction::CreateGroup { .. } => "CreateGroup",
            ClusterAction::UpdateGroup { .. } => "UpdateGroup",
            ClusterAction::DeleteGroup { .. } => "DeleteGroup",
            ClusterAction::AssignRole(_) => "AssignRole",
            ClusterAction::RemoveRole(_) => "RemoveRole",
        }
    }

    /// Human-readable description for audit logs.
    pub fn description(&self) -> String {
        match self {
            ClusterAction::CreateResource(r) => format!("Create {}", r.reference()),
            ClusterAction::UpdateResource(r) => format!("Update {}", r.reference()),
            ClusterAction::DeleteResource(r) => format!("Delete {}", r),
            ClusterAction::Ping => "Ping Keycloak admin API".to_string(),
            ClusterAction::CreateRealm(realm) => format!("Create realm {}", realm.realm),
            ClusterAction::DeleteRealm { realm } => format!("Delete realm {}", realm),
            ClusterAction::ConfigureRealm { realm, .. } => {
                format!("Configure browser redirector for realm {}", realm)
            }
            ClusterAction::CreateClient { realm, client } => {
                format!("Create client {} in realm {}", client.client_id, realm)
            }
            ClusterAction::UpdateClient { realm, client } => {
                format!("Update client {} in realm {}", client.client_id, realm)
            }
            ClusterAction::DeleteClient {
                realm, client_id, ..
            } => format!("Delete client {} in realm {}", client_id, realm),
            ClusterAction::CreateClientRole { realm, role, .. } => {
                format!("Create client role {} in realm {}", role.name, realm)
            }
            ClusterAction::UpdateClientRole { realm, role, .. } => {
                format!("Update client role {} in realm {}", role.name, realm)
            }
            ClusterAction::DeleteClientRole { realm, name, .. } => {
                format!("Delete client role {} in realm {}", name, realm)
            }
            ClusterAction::AddDefaultClientScope { realm, scope, .. } => {
                format!("Add default client scope {} in realm {}", scope.name, realm)
            }
            ClusterAction::RemoveDefaultClientScope { realm, scope, .. } => {
                format!("Remove default client scope {} in realm {}", scope.name, realm)
            }
            ClusterAction::CreateUser { realm, user } => {
                format!("Create user {} in realm {}", user.username, realm)
            }
            ClusterAction::UpdateUser { realm, user } => {
                format!("Update user {} in realm {}", user.username, realm)
            }
            ClusterAction::DeleteUser {
                realm, username, ..
            } => format!("Delete user {} in realm {}", username, realm),
            ClusterAction::AddUserToGroup {
                realm,
                user_id,
                group,
            } => format!(
                "Add user {} to group {} in realm {}",
                user_id, group.name, realm
            ),
            ClusterAction::RemoveUserFromGroup {
                realm,
                user_id,
                group,
            } => format!(
                "Remove user {} from group {} in realm {}",
                user_id, group.name, realm
            ),
            ClusterAction::CreateGroup { realm, group } => {
                format!("Create group {} in realm {}", group.name, realm)
            }
            ClusterAction::UpdateGroup { realm, group } => {
                format!("Update group {} in realm {}", group.name, realm)
            }
            ClusterAction::DeleteGroup { realm, name, .. } => {
                format!("Delete group {} in realm {}", name, realm)
            }
            ClusterAction::AssignRole(a) => format!(
                "Assign {} role {} to {} in realm {}",
                a.scope, a.role.name, a.holder, a.realm
            ),
            ClusterAction::RemoveRole(a) => format!(
                "Remove {} role {} from {} in realm {}",
                a.scope, a.role.name, a.holder, a.realm
            ),
        }
    }

    /// Execute this action and return a success message.
    pub async fn run(&self, runner: &ClusterActionRunner) -> Result<String> {
        match self {
            ClusterAction::CreateResource(resource) => {
                runner.store().create(resource).await?;
            }
            ClusterAction::UpdateResource(resource) => {
                runner.store().update(resource).await?;
            }
            ClusterAction::DeleteResource(reference) => {
                runner.store().delete(reference).await?;
            }
            ClusterAction::Ping => {
                runner.keycloak()?.ping().await?;
            }
            ClusterAction::CreateRealm(realm) => {
                runner.keycloak()?.create_realm(realm).await?;
            }
            ClusterAction::DeleteRealm { realm } => {
                runner.keycloak()?.delete_realm(realm).await?;
            }
            ClusterAction::ConfigureRealm { realm, overrides } => {
                configure_redirectors(runner, realm, overrides).await?;
            }
            ClusterAction::CreateClient { realm, client } => {
                let id = runner.keycloak()?.create_client(realm, client).await?;
                return Ok(format!("{} (id {})", self.description(), id));
            }
            ClusterAction::UpdateClient { realm, client } => {
                runner.keycloak()?.update_client(realm, client).await?;
            }
            ClusterAction::DeleteClient { realm, id, .. } => {
                runner.keycloak()?.delete_client(realm, id).await?;
            }
            ClusterAction::CreateClientRole {
                realm,
                client,
                role,
            } => {
                runner
                    .keycloak()?
                    .create_client_role(realm, client, role)
                    .await?;
            }
            ClusterAction::UpdateClientRole {
                realm,
                client,
                role,
            } => {
                runner
                    .keycloak()?
                    .update_client_role(realm, client, role)
                    .await?;
            }
            ClusterAction::DeleteClientRole {
                realm,
                client,
                name,
            } => {
                runner
                    .keycloak()?
                    .delete_client_role(realm, client, name)
                    .await?;
            }
            ClusterAction::AddDefaultClientScope {
                realm,
                client,
                scope,
            } => {
                let scope_id = id_of(&scope.id, "client scope", &scope.name)?;
                runner
                    .keycloak()?
                    .add_default_client_scope(realm, client, scope_id)
                    .await?;
            }
            ClusterAction::RemoveDefaultClientScope {
                realm,
                client,
                scope,
            } => {
                let scope_id = id_of(&scope.id, "client scope", &scope.name)?;
                runner
                    .keycloak()?
                    .remove_default_client_scope(realm, client, scope_id)
                    .await?;
            }
            ClusterAction::CreateUser { realm, user } => {
                let id = runner.keycloak()?.create_user(realm, user).await?;
                return Ok(format!("{} (id {})", self.description(), id));
            }
            ClusterAction::UpdateUser { realm, user } => {
                runner.keycloak()?.update_user(realm, user).await?;
            }
            ClusterAction::DeleteUser { realm, id, .. } => {
                runner.keycloak()?.delete_user(realm, id).await?;
            }
            ClusterAction::AddUserToGroup {
                realm,
                user_id,
                group,
            } => {
                let group_id = id_of(&group.id, "group", &group.name)?;
                runner
                    .keycloak()?
                    .add_user_to_group(realm, user_id, group_id)
                    .await?;
            }
            ClusterAction::RemoveUserFromGroup {
                realm,
                user_id,
                group,
            } => {
                let group_id = id_of(&group.id, "group", &group.name)?;
                runner
                    .keycloak()?
                    .remove_user_from_group(realm, user_id, group_id)
                    .await?;
            }
            ClusterAction::CreateGroup { realm, group } => {
                let id = runner.keycloak()?.create_group(realm, group).await?;
                return Ok(format!("{} (id {})", self.description(), id));
            }
            ClusterAction::UpdateGroup { realm, group } => {
                runner.keycloak()?.update_group(realm, group).await?;
            }
            ClusterAction::DeleteGroup { realm, id, .. } => {
                runner.keycloak()?.delete_group(realm, id).await?;
            }
            ClusterAction::AssignRole(a) => {
                runner
                    .keycloak()?
                    .assign_roles(&a.realm, &a.holder, &a.scope, std::slice::from_ref(&a.role))
                    .await?;
            }
            ClusterAction::RemoveRole(a) => {
                runner
                    .keycloak()?
                    .remove_roles(&a.realm, &a.holder, &a.scope, std::slice::from_ref(&a.role))
                    .await?;
            }
        }
        Ok(self.description())
    }
}

/// Make the browser flow's redirector default to each configured provider.
async fn configure_redirectors(
    runner: &ClusterActionRunner,
    realm: &str,
    overrides: &[RedirectorIdentityProviderOverride],
) -> Result<()> {
    let api = runner.keycloak()?;
    let providers = api.list_identity_providers(realm).await?;

    for item in overrides {
        if item.for_flow != "browser" {
            return Err(Error::Validation(format!(
                "redirector override for flow {} is not supported",
                item.for_flow
            )));
        }
        if !providers.iter().any(|p| p.alias == item.identity_provider) {
            return Err(Error::Validation(format!(
                "identity provider {} does not exist in realm {}",
                item.identity_provider, realm
            )));
        }

        let executions = api
            .list_authentication_executions(realm, &item.for_flow)
            .await?;
        let execution = executions
            .iter()
            .find(|e| e.provider_id.as_deref() == Some(IDP_REDIRECTOR_PROVIDER))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "flow {} in realm {} has no {} execution",
                    item.for_flow, realm, IDP_REDIRECTOR_PROVIDER
                ))
            })?;

        let config = AuthenticatorConfig {
            id: execution.authentication_config.clone(),
            alias: item.identity_provider.clone(),
            config: BTreeMap::from([(
                "defaultProvider".to_string(),
                item.identity_provider.clone(),
            )]),
        };

        match &execution.authentication_config {
            Some(_) => api.update_authenticator_config(realm, &config).await?,
            None => {
                let execution_id = id_of(&execution.id, "execution", IDP_REDIRECTOR_PROVIDER)?;
                api.create_authenticator_config(realm, execution_id, &config)
                    .await?
            }
        }
        debug!(realm, provider = %item.identity_provider, "Configured browser redirector");
    }
    Ok(())
}

/// Ordered list of actions for one reconcile cycle.
#[derive(Clone, Debug, Default)]
pub struct DesiredClusterState {
    actions: Vec<ClusterAction>,
}

impl DesiredClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action; `None` is skipped.
    pub fn add(&mut self, action: Option<ClusterAction>) -> &mut Self {
        if let Some(action) = action {
            self.actions.push(action);
        }
        self
    }

    pub fn push(&mut self, action: ClusterAction) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn extend(&mut self, actions: impl IntoIterator<Item = ClusterAction>) -> &mut Self {
        self.actions.extend(actions);
        self
    }

    /// Insert an action ahead of everything at `index` and later.
    pub fn insert(&mut self, index: usize, action: ClusterAction) {
        let index = index.min(self.actions.len());
        self.actions.insert(index, action);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClusterAction> {
        self.actions.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ClusterAction> {
        self.actions.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[ClusterAction] {
        &self.actions
    }

    /// Variant names in order, handy in logs and tests.
    pub fn names(&self) -> Vec<&'static str> {
        self.actions.iter().map(ClusterAction::name).collect()
    }
}

impl From<Vec<ClusterAction>> for DesiredClusterState {
    fn from(actions: Vec<ClusterAction>) -> Self {
        Self { actions }
    }
}

impl IntoIterator for DesiredClusterState {
    type Item = ClusterAction;
    type IntoIter = std::vec::IntoIter<ClusterAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

impl<'a> IntoIterator for &'a DesiredClusterState {
    type Item = &'a ClusterAction;
    type IntoIter = std::slice::Iter<'a, ClusterAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}
