//! Keycloak admin REST API.
//!
//! [`KeycloakApi`] is the surface the action runner and state readers use.
//! [`KeycloakClient`] implements it over HTTP with a bearer token obtained by
//! [`KeycloakClientFactory`].

pub mod auth;
pub mod client;
pub mod types;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

pub use auth::{AdminCredentials, KeycloakClientFactory};
pub use client::KeycloakClient;

use crate::controller::error::Result;
use types::{
    AuthenticationExecutionInfo, AuthenticatorConfig, Client, ClientScope, Group,
    IdentityProvider, Realm, Role, User,
};

/// Entity that can hold role mappings.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoleHolder {
    User(String),
    Group(String),
}

impl RoleHolder {
    fn path_segment(&self) -> &'static str {
        match self {
            RoleHolder::User(_) => "users",
            RoleHolder::Group(_) => "groups",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RoleHolder::User(id) | RoleHolder::Group(id) => id,
        }
    }
}

impl std::fmt::Display for RoleHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleHolder::User(id) => write!(f, "user {}", id),
            RoleHolder::Group(id) => write!(f, "group {}", id),
        }
    }
}

/// Where a role is defined.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoleScope {
    Realm,
    /// A client role. `id` is the server-assigned client id, `client_id` the
    /// human-readable clientId.
    Client { id: String, client_id: String },
}

impl std::fmt::Display for RoleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleScope::Realm => write!(f, "realm"),
            RoleScope::Client { client_id, .. } => write!(f, "client {}", client_id),
        }
    }
}

/// Keycloak admin API operations used by the operator.
///
/// Lookups return `Ok(None)` on 404. Create calls that produce an entity
/// return its server-assigned id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeycloakApi: Send + Sync {
    /// Check the server answers.
    async fn ping(&self) -> Result<()>;

    // Realms
    async fn get_realm(&self, realm: &str) -> Result<Option<Realm>>;
    async fn list_realms(&self) -> Result<Vec<Realm>>;
    async fn create_realm(&self, realm: &Realm) -> Result<()>;
    async fn delete_realm(&self, realm: &str) -> Result<()>;
    async fn list_realm_roles(&self, realm: &str) -> Result<Vec<Role>>;

    // Clients
    async fn find_client(&self, realm: &str, client_id: &str) -> Result<Option<Client>>;
    async fn create_client(&self, realm: &str, client: &Client) -> Result<String>;
    async fn update_client(&self, realm: &str, client: &Client) -> Result<()>;
    async fn delete_client(&self, realm: &str, id: &str) -> Result<()>;
    async fn get_client_secret(&self, realm: &str, id: &str) -> Result<Option<String>>;
    async fn get_service_account_user(&self, realm: &str, id: &str) -> Result<Option<User>>;

    // Client roles
    async fn list_client_roles(&self, realm: &str, id: &str) -> Result<Vec<Role>>;
    async fn create_client_role(&self, realm: &str, id: &str, role: &Role) -> Result<()>;
    async fn update_client_role(&self, realm: &str, id: &str, role: &Role) -> Result<()>;
    async fn delete_client_role(&self, realm: &str, id: &str, name: &str) -> Result<()>;

    // Client scopes
    async fn list_client_scopes(&self, realm: &str) -> Result<Vec<ClientScope>>;
    async fn list_default_client_scopes(&self, realm: &str, id: &str)
    -> Result<Vec<ClientScope>>;
    async fn add_default_client_scope(&self, realm: &str, id: &str, scope_id: &str)
    -> Result<()>;
    async fn remove_default_client_scope(
        &self,
        realm: &str,
        id: &str,
        scope_id: &str,
    ) -> Result<()>;

    // Users
    async fn find_user(&self, realm: &str, username: &str) -> Result<Option<User>>;
    async fn create_user(&self, realm: &str, user: &User) -> Result<String>;
    async fn update_user(&self, realm: &str, user: &User) -> Result<()>;
    async fn delete_user(&self, realm: &str, id: &str) -> Result<()>;
    async fn list_user_groups(&self, realm: &str, user_id: &str) -> Result<Vec<Group>>;
    async fn add_user_to_group(&self, realm: &str, user_id: &str, group_id: &str) -> Result<()>;
    async fn remove_user_from_group(
        &self,
        realm: &str,
        user_id: &str,
        group_id: &str,
    ) -> Result<()>;

    // Groups
    async fn find_group(&self, realm: &str, name: &str) -> Result<Option<Group>>;
    async fn list_groups(&self, realm: &str) -> Result<Vec<Group>>;
    async fn create_group(&self, realm: &str, group: &Group) -> Result<String>;
    async fn update_group(&self, realm: &str, group: &Group) -> Result<()>;
    async fn delete_group(&self, realm: &str, id: &str) -> Result<()>;

    // Role mappings
    async fn list_assigned_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
    ) -> Result<Vec<Role>>;
    async fn list_available_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
    ) -> Result<Vec<Role>>;
    async fn assign_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
        roles: &[Role],
    ) -> Result<()>;
    async fn remove_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
        roles: &[Role],
    ) -> Result<()>;

    // Identity providers and authentication flows
    async fn list_identity_providers(&self, realm: &str) -> Result<Vec<IdentityProvider>>;
    async fn list_authentication_executions(
        &self,
        realm: &str,
        flow_alias: &str,
    ) -> Result<Vec<AuthenticationExecutionInfo>>;
    async fn create_authenticator_config(
        &self,
        realm: &str,
        execution_id: &str,
        config: &AuthenticatorConfig,
    ) -> Result<()>;
    async fn update_authenticator_config(
        &self,
        realm: &str,
        config: &AuthenticatorConfig,
    ) -> Result<()>;
}
