//! HTTP implementation of [`KeycloakApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::types::{
    AuthenticationExecutionInfo, AuthenticatorConfig, Client, ClientScope, Group,
    IdentityProvider, Realm, Role, User,
};
use super::{KeycloakApi, RoleHolder, RoleScope};
use crate::controller::error::{Error, Result};

/// Default bound on every admin API call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client secret as returned by the admin API.
#[derive(serde::Deserialize)]
struct ClientSecret {
    value: Option<String>,
}

/// Authenticated admin API client.
#[derive(Clone, Debug)]
pub struct KeycloakClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl KeycloakClient {
    /// Build a client from an already configured HTTP client and a bearer token.
    pub fn new(http: reqwest::Client, base_url: Url, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            token: token.into(),
        }
    }

    /// URL under `/auth/admin/realms`.
    fn admin_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Configuration(format!("invalid Keycloak URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["auth", "admin", "realms"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// Turn a non-success response into an error carrying the body.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::keycloak(status.as_u16(), body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    /// Search results; a realm that does not exist yet holds nothing.
    async fn search<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
        Ok(self.get_optional(url).await?.unwrap_or_default())
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &T,
    ) -> Result<Response> {
        let response = self.request(method, url).json(body).send().await?;
        Self::check(response).await
    }

    async fn send_empty(&self, method: Method, url: Url) -> Result<()> {
        let response = self.request(method, url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// POST a new entity and return the id from the Location header.
    async fn create_entity<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> Result<String> {
        let response = self.send_json(Method::POST, url, body).await?;
        created_id(&response)
    }

    fn role_mapping_url(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
        available: bool,
    ) -> Result<Url> {
        let mut segments = vec![realm, holder.path_segment(), holder.id(), "role-mappings"];
        match scope {
            RoleScope::Realm => segments.push("realm"),
            RoleScope::Client { id, .. } => {
                segments.push("clients");
                segments.push(id);
            }
        }
        if available {
            segments.push("available");
        }
        self.admin_url(&segments)
    }
}

/// Extract the id Keycloak puts at the end of the Location header.
fn created_id(response: &Response) -> Result<String> {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingField("Location header on create".to_string()))
}

fn entity_id<'a>(id: &'a Option<String>, what: &str) -> Result<&'a str> {
    id.as_deref()
        .ok_or_else(|| Error::MissingField(format!("{} id", what)))
}

#[async_trait]
impl KeycloakApi for KeycloakClient {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<()> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Configuration(format!("invalid Keycloak URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["auth", "realms", "master"]);
        let response = self.http.get(url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_realm(&self, realm: &str) -> Result<Option<Realm>> {
        self.get_optional(self.admin_url(&[realm])?).await
    }

    #[instrument(skip(self))]
    async fn list_realms(&self) -> Result<Vec<Realm>> {
        self.get_json(self.admin_url(&[])?).await
    }

    #[instrument(skip(self, realm), fields(realm = %realm.realm))]
    async fn create_realm(&self, realm: &Realm) -> Result<()> {
        self.send_json(Method::POST, self.admin_url(&[])?, realm)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_realm(&self, realm: &str) -> Result<()> {
        self.send_empty(Method::DELETE, self.admin_url(&[realm])?)
            .await
    }

    #[instrument(skip(self))]
    async fn list_realm_roles(&self, realm: &str) -> Result<Vec<Role>> {
        self.get_json(self.admin_url(&[realm, "roles"])?).await
    }

    #[instrument(skip(self))]
    async fn find_client(&self, realm: &str, client_id: &str) -> Result<Option<Client>> {
        let mut url = self.admin_url(&[realm, "clients"])?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        let clients: Vec<Client> = self.search(url).await?;
        Ok(clients.into_iter().find(|c| c.client_id == client_id))
    }

    #[instrument(skip(self, client), fields(client_id = %client.client_id))]
    async fn create_client(&self, realm: &str, client: &Client) -> Result<String> {
        self.create_entity(self.admin_url(&[realm, "clients"])?, client)
            .await
    }

    #[instrument(skip(self, client), fields(client_id = %client.client_id))]
    async fn update_client(&self, realm: &str, client: &Client) -> Result<()> {
        let id = entity_id(&client.id, "client")?;
        self.send_json(Method::PUT, self.admin_url(&[realm, "clients", id])?, client)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_client(&self, realm: &str, id: &str) -> Result<()> {
        self.send_empty(Method::DELETE, self.admin_url(&[realm, "clients", id])?)
            .await
    }

    #[instrument(skip(self))]
    async fn get_client_secret(&self, realm: &str, id: &str) -> Result<Option<String>> {
        let secret: Option<ClientSecret> = self
            .get_optional(self.admin_url(&[realm, "clients", id, "client-secret"])?)
            .await?;
        Ok(secret.and_then(|s| s.value))
    }

    #[instrument(skip(self))]
    async fn get_service_account_user(&self, realm: &str, id: &str) -> Result<Option<User>> {
        self.get_optional(self.admin_url(&[realm, "clients", id, "service-account-user"])?)
            .await
    }

    #[instrument(skip(self))]
    async fn list_client_roles(&self, realm: &str, id: &str) -> Result<Vec<Role>> {
        self.get_json(self.admin_url(&[realm, "clients", id, "roles"])?)
            .await
    }

    #[instrument(skip(self, role), fields(role = %role.name))]
    async fn create_client_role(&self, realm: &str, id: &str, role: &Role) -> Result<()> {
        self.send_json(
            Method::POST,
            self.admin_url(&[realm, "clients", id, "roles"])?,
            role,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, role), fields(role = %role.name))]
    async fn update_client_role(&self, realm: &str, id: &str, role: &Role) -> Result<()> {
        self.send_json(
            Method::PUT,
            self.admin_url(&[realm, "clients", id, "roles", &role.name])?,
            role,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_client_role(&self, realm: &str, id: &str, name: &str) -> Result<()> {
        self.send_empty(
            Method::DELETE,
            self.admin_url(&[realm, "clients", id, "roles", name])?,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_client_scopes(&self, realm: &str) -> Result<Vec<ClientScope>> {
        self.get_json(self.admin_url(&[realm, "client-scopes"])?)
            .await
    }

    #[instrument(skip(self))]
    async fn list_default_client_scopes(
        &self,
        realm: &str,
        id: &str,
    ) -> Result<Vec<ClientScope>> {
        self.get_json(self.admin_url(&[realm, "clients", id, "default-client-scopes"])?)
            .await
    }

    #[instrument(skip(self))]
    async fn add_default_client_scope(
        &self,
        realm: &str,
        id: &str,
        scope_id: &str,
    ) -> Result<()> {
        self.send_empty(
            Method::PUT,
            self.admin_url(&[realm, "clients", id, "default-client-scopes", scope_id])?,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn remove_default_client_scope(
        &self,
        realm: &str,
        id: &str,
        scope_id: &str,
    ) -> Result<()> {
        self.send_empty(
            Method::DELETE,
            self.admin_url(&[realm, "clients", id, "default-client-scopes", scope_id])?,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_user(&self, realm: &str, username: &str) -> Result<Option<User>> {
        let mut url = self.admin_url(&[realm, "users"])?;
        url.query_pairs_mut()
            .append_pair("username", username)
            .append_pair("exact", "true");
        let users: Vec<User> = self.search(url).await?;
        // Keycloak lowercases usernames on storage
        Ok(users
            .into_iter()
            .find(|u| u.username.eq_ignore_ascii_case(username)))
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn create_user(&self, realm: &str, user: &User) -> Result<String> {
        self.create_entity(self.admin_url(&[realm, "users"])?, user)
            .await
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn update_user(&self, realm: &str, user: &User) -> Result<()> {
        let id = entity_id(&user.id, "user")?;
        self.send_json(Method::PUT, self.admin_url(&[realm, "users", id])?, user)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, realm: &str, id: &str) -> Result<()> {
        self.send_empty(Method::DELETE, self.admin_url(&[realm, "users", id])?)
            .await
    }

    #[instrument(skip(self))]
    async fn list_user_groups(&self, realm: &str, user_id: &str) -> Result<Vec<Group>> {
        self.get_json(self.admin_url(&[realm, "users", user_id, "groups"])?)
            .await
    }

    #[instrument(skip(self))]
    async fn add_user_to_group(&self, realm: &str, user_id: &str, group_id: &str) -> Result<()> {
        self.send_empty(
            Method::PUT,
            self.admin_url(&[realm, "users", user_id, "groups", group_id])?,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn remove_user_from_group(
        &self,
        realm: &str,
        user_id: &str,
        group_id: &str,
    ) -> Result<()> {
        self.send_empty(
            Method::DELETE,
            self.admin_url(&[realm, "users", user_id, "groups", group_id])?,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_group(&self, realm: &str, name: &str) -> Result<Option<Group>> {
        let mut url = self.admin_url(&[realm, "groups"])?;
        url.query_pairs_mut().append_pair("search", name);
        let groups: Vec<Group> = self.search(url).await?;
        Ok(groups.into_iter().find(|g| g.name == name))
    }

    #[instrument(skip(self))]
    async fn list_groups(&self, realm: &str) -> Result<Vec<Group>> {
        self.get_json(self.admin_url(&[realm, "groups"])?).await
    }

    #[instrument(skip(self, group), fields(group = %group.name))]
    async fn create_group(&self, realm: &str, group: &Group) -> Result<String> {
        self.create_entity(self.admin_url(&[realm, "groups"])?, group)
            .await
    }

    #[instrument(skip(self, group), fields(group = %group.name))]
    async fn update_group(&self, realm: &str, group: &Group) -> Result<()> {
        let id = entity_id(&group.id, "group")?;
        self.send_json(Method::PUT, self.admin_url(&[realm, "groups", id])?, group)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_group(&self, realm: &str, id: &str) -> Result<()> {
        self.send_empty(Method::DELETE, self.admin_url(&[realm, "groups", id])?)
            .await
    }

    #[instrument(skip(self), fields(holder = %holder, scope = %scope))]
    async fn list_assigned_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
    ) -> Result<Vec<Role>> {
        self.get_json(self.role_mapping_url(realm, holder, scope, false)?)
            .await
    }

    #[instrument(skip(self), fields(holder = %holder, scope = %scope))]
    async fn list_available_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
    ) -> Result<Vec<Role>> {
        self.get_json(self.role_mapping_url(realm, holder, scope, true)?)
            .await
    }

    #[instrument(skip(self, roles), fields(holder = %holder, scope = %scope, count = roles.len()))]
    async fn assign_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
        roles: &[Role],
    ) -> Result<()> {
        self.send_json(
            Method::POST,
            self.role_mapping_url(realm, holder, scope, false)?,
            roles,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, roles), fields(holder = %holder, scope = %scope, count = roles.len()))]
    async fn remove_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
        roles: &[Role],
    ) -> Result<()> {
        self.send_json(
            Method::DELETE,
            self.role_mapping_url(realm, holder, scope, false)?,
            roles,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_identity_providers(&self, realm: &str) -> Result<Vec<IdentityProvider>> {
        self.get_json(self.admin_url(&[realm, "identity-provider", "instances"])?)
            .await
    }

    #[instrument(skip(self))]
    async fn list_authentication_executions(
        &self,
        realm: &str,
        flow_alias: &str,
    ) -> Result<Vec<AuthenticationExecutionInfo>> {
        self.get_json(self.admin_url(&[
            realm,
            "authentication",
            "flows",
            flow_alias,
            "executions",
        ])?)
        .await
    }

    #[instrument(skip(self, config), fields(alias = %config.alias))]
    async fn create_authenticator_config(
        &self,
        realm: &str,
        execution_id: &str,
        config: &AuthenticatorConfig,
    ) -> Result<()> {
        self.send_json(
            Method::POST,
            self.admin_url(&[realm, "authentication", "executions", execution_id, "config"])?,
            config,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, config), fields(alias = %config.alias))]
    async fn update_authenticator_config(
        &self,
        realm: &str,
        config: &AuthenticatorConfig,
    ) -> Result<()> {
        let id = entity_id(&config.id, "authenticator config")?;
        self.send_json(
            Method::PUT,
            self.admin_url(&[realm, "authentication", "config", id])?,
            config,
        )
        .await?;
        debug!(id, "Updated authenticator config");
        Ok(())
    }
}
