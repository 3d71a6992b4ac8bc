//! In-memory stand-ins for the Kubernetes API and the Keycloak admin API.
//!
//! Both keep a call log so tests can check what a cycle actually did, and
//! both can be told to fail specific calls.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kube::Resource;

use keycloak_operator::controller::error::{Error, Result};
use keycloak_operator::keycloak::types::{
    AuthenticationExecutionInfo, AuthenticatorConfig, Client, ClientScope, Group,
    IdentityProvider, Realm, Role, User,
};
use keycloak_operator::keycloak::{KeycloakApi, RoleHolder, RoleScope};
use keycloak_operator::store::{ManagedResource, ResourceKind, ResourceRef, ResourceStore};

type Key = (ResourceKind, String, String);

/// [`ResourceStore`] keeping objects in a map.
///
/// Every write bumps a resourceVersion, and an update whose payload does not
/// carry the stored version is rejected with a 409 like the API server does.
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<Key, ManagedResource>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<String>>,
    version: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without going through `create`.
    pub fn insert(&self, resource: ManagedResource) {
        let stamped = self.stamp(resource);
        self.objects
            .lock()
            .unwrap()
            .insert(key(&stamped.reference()), stamped);
    }

    /// Make every write of the named object fail.
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn get_object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<ManagedResource> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn contains(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.get_object(kind, namespace, name).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Writes in the order they happened, e.g. `create Secret sso/admin`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn log(&self, verb: &str, reference: &ResourceRef) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", verb, reference));
    }

    fn check_failure(&self, reference: &ResourceRef) -> Result<()> {
        if self.failing.lock().unwrap().contains(&reference.name) {
            return Err(Error::Transient(format!("injected failure for {}", reference)));
        }
        Ok(())
    }

    fn stamp(&self, resource: ManagedResource) -> ManagedResource {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        with_resource_version(resource, version.to_string())
    }
}

fn key(reference: &ResourceRef) -> Key {
    (
        reference.kind,
        reference.namespace.clone(),
        reference.name.clone(),
    )
}

fn set_version<K: Resource>(mut object: K, version: String) -> K {
    object.meta_mut().resource_version = Some(version);
    object
}

fn with_resource_version(resource: ManagedResource, version: String) -> ManagedResource {
    match resource {
        ManagedResource::Secret(o) => ManagedResource::Secret(set_version(o, version)),
        ManagedResource::Service(o) => ManagedResource::Service(set_version(o, version)),
        ManagedResource::StatefulSet(o) => ManagedResource::StatefulSet(set_version(o, version)),
        ManagedResource::Deployment(o) => ManagedResource::Deployment(set_version(o, version)),
        ManagedResource::PersistentVolumeClaim(o) => {
            ManagedResource::PersistentVolumeClaim(set_version(o, version))
        }
        ManagedResource::Ingress(o) => ManagedResource::Ingress(set_version(o, version)),
        ManagedResource::PodDisruptionBudget(o) => {
            ManagedResource::PodDisruptionBudget(set_version(o, version))
        }
        ManagedResource::Job(o) => ManagedResource::Job(set_version(o, version)),
        ManagedResource::CronJob(o) => ManagedResource::CronJob(set_version(o, version)),
        ManagedResource::Endpoints(o) => ManagedResource::Endpoints(set_version(o, version)),
        ManagedResource::KeycloakBackup(o) => {
            ManagedResource::KeycloakBackup(set_version(o, version))
        }
        ManagedResource::Custom { kind, mut object } => {
            object.metadata.resource_version = Some(version);
            ManagedResource::Custom { kind, object }
        }
    }
}

fn conflict(message: String) -> Error {
    Error::Kube(kube::Error::Api(Box::new(kube::core::Status {
        status: Some(kube::core::response::StatusSummary::Failure),
        message,
        reason: "Conflict".to_string(),
        code: 409,
        metadata: None,
        details: None,
    })))
}

/// Labels of a stored object, for selector matching.
fn labels_of(resource: &ManagedResource) -> BTreeMap<String, String> {
    fn of<K: Resource>(o: &K) -> BTreeMap<String, String> {
        o.meta().labels.clone().unwrap_or_default()
    }
    match resource {
        ManagedResource::Secret(o) => of(o),
        ManagedResource::Service(o) => of(o),
        ManagedResource::StatefulSet(o) => of(o),
        ManagedResource::Deployment(o) => of(o),
        ManagedResource::PersistentVolumeClaim(o) => of(o),
        ManagedResource::Ingress(o) => of(o),
        ManagedResource::PodDisruptionBudget(o) => of(o),
        ManagedResource::Job(o) => of(o),
        ManagedResource::CronJob(o) => of(o),
        ManagedResource::Endpoints(o) => of(o),
        ManagedResource::KeycloakBackup(o) => of(o),
        ManagedResource::Custom { object, .. } => object.metadata.labels.clone().unwrap_or_default(),
    }
}

/// Equality-based selectors only (`a=b,c=d`).
fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term.trim()),
        })
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>> {
        Ok(self.get_object(kind, namespace, name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((k, ns, _), o)| *k == kind && ns == namespace && selector_matches(selector, &labels_of(o)))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, resource: &ManagedResource) -> Result<()> {
        let reference = resource.reference();
        self.log("create", &reference);
        self.check_failure(&reference)?;
        if self.contains(reference.kind, &reference.namespace, &reference.name) {
            return Err(conflict(format!("{} already exists", reference)));
        }
        self.insert(resource.clone());
        Ok(())
    }

    async fn update(&self, resource: &ManagedResource) -> Result<()> {
        let reference = resource.reference();
        self.log("update", &reference);
        self.check_failure(&reference)?;
        let Some(stored) = self.get_object(reference.kind, &reference.namespace, &reference.name)
        else {
            return Err(Error::Kube(kube::Error::Api(Box::new(kube::core::Status {
                status: Some(kube::core::response::StatusSummary::Failure),
                message: format!("{} not found", reference),
                reason: "NotFound".to_string(),
                code: 404,
                metadata: None,
                details: None,
            }))));
        };
        if stored.resource_version() != resource.resource_version() {
            return Err(conflict(format!(
                "{} has version {:?}, update carried {:?}",
                reference,
                stored.resource_version(),
                resource.resource_version()
            )));
        }
        self.insert(resource.clone());
        Ok(())
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        self.log("delete", reference);
        self.check_failure(reference)?;
        self.objects.lock().unwrap().remove(&key(reference));
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct RealmData {
    realm: Realm,
    realm_roles: Vec<Role>,
    users: Vec<User>,
    groups: Vec<Group>,
    clients: Vec<Client>,
    client_roles: BTreeMap<String, Vec<Role>>,
    client_scopes: Vec<ClientScope>,
    /// Default client scope ids by client id.
    default_scopes: BTreeMap<String, BTreeSet<String>>,
    /// Group ids by user id.
    memberships: BTreeMap<String, BTreeSet<String>>,
    /// Assigned roles by holder id and scope ("realm" or a client id).
    mappings: BTreeMap<(String, String), Vec<Role>>,
    /// Service account user id by client id.
    service_accounts: BTreeMap<String, String>,
    identity_providers: Vec<IdentityProvider>,
    executions: BTreeMap<String, Vec<AuthenticationExecutionInfo>>,
    authenticator_configs: Vec<AuthenticatorConfig>,
}

fn scope_key(scope: &RoleScope) -> String {
    match scope {
        RoleScope::Realm => "realm".to_string(),
        RoleScope::Client { id, .. } => id.clone(),
    }
}

fn not_found(what: impl std::fmt::Display) -> Error {
    Error::keycloak(404, format!("{} not found", what))
}

/// [`KeycloakApi`] over an in-memory set of realms.
///
/// Like Keycloak, creating a user ignores role and group names in the
/// representation; those only change through role mapping and membership
/// calls.
#[derive(Default)]
pub struct FakeKeycloak {
    realms: Mutex<BTreeMap<String, RealmData>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<String>>,
    next_id: AtomicU64,
}

impl FakeKeycloak {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of the named method fail with a 500.
    pub fn fail_on(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    /// Method calls in the order they happened.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Create an empty realm directly.
    pub fn seed_realm(&self, name: &str) {
        self.realms.lock().unwrap().insert(
            name.to_string(),
            RealmData {
                realm: Realm {
                    id: Some(name.to_string()),
                    realm: name.to_string(),
                    enabled: Some(true),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
    }

    pub fn seed_realm_role(&self, realm: &str, name: &str) {
        let id = self.id();
        self.with_realm(realm, |data| {
            data.realm_roles.push(Role {
                id: Some(id),
                name: name.to_string(),
                ..Default::default()
            });
        });
    }

    pub fn seed_group(&self, realm: &str, name: &str) -> String {
        let id = self.id();
        let group = Group {
            id: Some(id.clone()),
            name: name.to_string(),
            path: Some(format!("/{}", name)),
            ..Default::default()
        };
        self.with_realm(realm, |data| data.groups.push(group));
        id
    }

    pub fn seed_client_scope(&self, realm: &str, name: &str) {
        let id = self.id();
        self.with_realm(realm, |data| {
            data.client_scopes.push(ClientScope {
                id: Some(id),
                name: name.to_string(),
                protocol: Some("openid-connect".to_string()),
            });
        });
    }

    pub fn seed_browser_redirector(&self, realm: &str, provider: &str) {
        let id = self.id();
        self.with_realm(realm, |data| {
            data.identity_providers.push(IdentityProvider {
                alias: provider.to_string(),
                provider_id: Some("oidc".to_string()),
                enabled: Some(true),
                config: None,
            });
            data.executions.insert(
                "browser".to_string(),
                vec![AuthenticationExecutionInfo {
                    id: Some(id),
                    provider_id: Some("identity-provider-redirector".to_string()),
                    ..Default::default()
                }],
            );
        });
    }

    /// Map roles to a user directly, bypassing the call log.
    pub fn seed_user_realm_roles(&self, realm: &str, username: &str, roles: &[&str]) {
        self.with_realm(realm, |data| {
            let Some(user_id) = data
                .users
                .iter()
                .find(|u| u.username == username)
                .and_then(|u| u.id.clone())
            else {
                return;
            };
            let assigned: Vec<Role> = data
                .realm_roles
                .iter()
                .filter(|r| roles.contains(&r.name.as_str()))
                .cloned()
                .collect();
            data.mappings
                .insert((user_id, "realm".to_string()), assigned);
        });
    }

    pub fn realm(&self, name: &str) -> Option<Realm> {
        self.realms.lock().unwrap().get(name).map(|d| d.realm.clone())
    }

    pub fn user(&self, realm: &str, username: &str) -> Option<User> {
        self.realms
            .lock()
            .unwrap()
            .get(realm)
            .and_then(|d| d.users.iter().find(|u| u.username == username).cloned())
    }

    pub fn client(&self, realm: &str, client_id: &str) -> Option<Client> {
        self.realms
            .lock()
            .unwrap()
            .get(realm)
            .and_then(|d| d.clients.iter().find(|c| c.client_id == client_id).cloned())
    }

    pub fn group(&self, realm: &str, name: &str) -> Option<Group> {
        self.realms
            .lock()
            .unwrap()
            .get(realm)
            .and_then(|d| d.groups.iter().find(|g| g.name == name).cloned())
    }

    /// Names of the roles mapped to a holder, sorted.
    pub fn assigned_role_names(&self, realm: &str, holder_id: &str, scope: &str) -> Vec<String> {
        let realms = self.realms.lock().unwrap();
        let mut names: Vec<String> = realms
            .get(realm)
            .and_then(|d| d.mappings.get(&(holder_id.to_string(), scope.to_string())))
            .map(|roles| roles.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Names of the groups a user belongs to, sorted.
    pub fn member_of(&self, realm: &str, user_id: &str) -> Vec<String> {
        let realms = self.realms.lock().unwrap();
        let Some(data) = realms.get(realm) else {
            return Vec::new();
        };
        let ids = data.memberships.get(user_id).cloned().unwrap_or_default();
        let mut names: Vec<String> = data
            .groups
            .iter()
            .filter(|g| g.id.as_ref().is_some_and(|id| ids.contains(id)))
            .map(|g| g.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn authenticator_configs(&self, realm: &str) -> Vec<AuthenticatorConfig> {
        self.realms
            .lock()
            .unwrap()
            .get(realm)
            .map(|d| d.authenticator_configs.clone())
            .unwrap_or_default()
    }

    fn id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn call(&self, method: &str, detail: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", method, detail).trim_end().to_string());
        if self.failing.lock().unwrap().contains(method) {
            return Err(Error::keycloak(500, format!("injected failure in {}", method)));
        }
        Ok(())
    }

    fn with_realm<T>(&self, realm: &str, f: impl FnOnce(&mut RealmData) -> T) -> T
    where
        T: Default,
    {
        let mut realms = self.realms.lock().unwrap();
        realms.get_mut(realm).map(f).unwrap_or_default()
    }

    fn mutate<T>(&self, realm: &str, f: impl FnOnce(&mut RealmData) -> Result<T>) -> Result<T> {
        let mut realms = self.realms.lock().unwrap();
        let data = realms
            .get_mut(realm)
            .ok_or_else(|| not_found(format!("realm {}", realm)))?;
        f(data)
    }

    fn read<T: Default>(&self, realm: &str, f: impl FnOnce(&RealmData) -> T) -> T {
        self.realms.lock().unwrap().get(realm).map(f).unwrap_or_default()
    }

    fn insert_user(&self, data: &mut RealmData, user: &User) -> String {
        let id = self.id();
        data.users.push(User {
            id: Some(id.clone()),
            realm_roles: Vec::new(),
            client_roles: BTreeMap::new(),
            groups: Vec::new(),
            ..user.clone()
        });
        id
    }
}

#[async_trait]
impl KeycloakApi for FakeKeycloak {
    async fn ping(&self) -> Result<()> {
        self.call("ping", "")
    }

    async fn get_realm(&self, realm: &str) -> Result<Option<Realm>> {
        self.call("get_realm", realm)?;
        Ok(self.realm(realm))
    }

    async fn list_realms(&self) -> Result<Vec<Realm>> {
        self.call("list_realms", "")?;
        Ok(self
            .realms
            .lock()
            .unwrap()
            .values()
            .map(|d| d.realm.clone())
            .collect())
    }

    async fn create_realm(&self, realm: &Realm) -> Result<()> {
        self.call("create_realm", &realm.realm)?;
        if self.realm(&realm.realm).is_some() {
            return Err(Error::keycloak(409, format!("realm {} exists", realm.realm)));
        }
        let mut data = RealmData {
            realm: Realm {
                id: Some(realm.realm.clone()),
                users: Vec::new(),
                ..realm.clone()
            },
            ..Default::default()
        };
        for name in ["offline_access", "uma_authorization"] {
            data.realm_roles.push(Role {
                id: Some(self.id()),
                name: name.to_string(),
                ..Default::default()
            });
        }
        for user in &realm.users {
            self.insert_user(&mut data, user);
        }
        self.realms
            .lock()
            .unwrap()
            .insert(realm.realm.clone(), data);
        Ok(())
    }

    async fn delete_realm(&self, realm: &str) -> Result<()> {
        self.call("delete_realm", realm)?;
        self.realms
            .lock()
            .unwrap()
            .remove(realm)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("realm {}", realm)))
    }

    async fn list_realm_roles(&self, realm: &str) -> Result<Vec<Role>> {
        self.call("list_realm_roles", realm)?;
        Ok(self.read(realm, |d| d.realm_roles.clone()))
    }

    async fn find_client(&self, realm: &str, client_id: &str) -> Result<Option<Client>> {
        self.call("find_client", client_id)?;
        Ok(self.client(realm, client_id))
    }

    async fn create_client(&self, realm: &str, client: &Client) -> Result<String> {
        self.call("create_client", &client.client_id)?;
        let id = self.id();
        let account_id = self.id();
        self.mutate(realm, |data| {
            if data.clients.iter().any(|c| c.client_id == client.client_id) {
                return Err(Error::keycloak(409, format!("client {} exists", client.client_id)));
            }
            let mut created = Client {
                id: Some(id.clone()),
                ..client.clone()
            };
            if !created.public_client.unwrap_or(false) && created.secret.is_none() {
                created.secret = Some(format!("secret-{}", id));
            }
            if created.service_accounts_enabled.unwrap_or(false) {
                data.users.push(User {
                    id: Some(account_id.clone()),
                    username: format!("service-account-{}", client.client_id),
                    enabled: Some(true),
                    ..Default::default()
                });
                data.service_accounts.insert(id.clone(), account_id);
            }
            data.clients.push(created);
            Ok(id.clone())
        })
    }

    async fn update_client(&self, realm: &str, client: &Client) -> Result<()> {
        self.call("update_client", &client.client_id)?;
        self.mutate(realm, |data| {
            let stored = data
                .clients
                .iter_mut()
                .find(|c| c.id.is_some() && c.id == client.id)
                .ok_or_else(|| not_found(format!("client {}", client.client_id)))?;
            let secret = stored.secret.clone();
            *stored = client.clone();
            if stored.secret.is_none() {
                stored.secret = secret;
            }
            Ok(())
        })
    }

    async fn delete_client(&self, realm: &str, id: &str) -> Result<()> {
        self.call("delete_client", id)?;
        self.mutate(realm, |data| {
            let before = data.clients.len();
            data.clients.retain(|c| c.id.as_deref() != Some(id));
            if data.clients.len() == before {
                return Err(not_found(format!("client {}", id)));
            }
            data.client_roles.remove(id);
            Ok(())
        })
    }

    async fn get_client_secret(&self, realm: &str, id: &str) -> Result<Option<String>> {
        self.call("get_client_secret", id)?;
        Ok(self.read(realm, |d| {
            d.clients
                .iter()
                .find(|c| c.id.as_deref() == Some(id))
                .and_then(|c| c.secret.clone())
        }))
    }

    async fn get_service_account_user(&self, realm: &str, id: &str) -> Result<Option<User>> {
        self.call("get_service_account_user", id)?;
        Ok(self.read(realm, |d| {
            d.service_accounts
                .get(id)
                .and_then(|user_id| d.users.iter().find(|u| u.id.as_ref() == Some(user_id)))
                .cloned()
        }))
    }

    async fn list_client_roles(&self, realm: &str, id: &str) -> Result<Vec<Role>> {
        self.call("list_client_roles", id)?;
        Ok(self.read(realm, |d| d.client_roles.get(id).cloned().unwrap_or_default()))
    }

    async fn create_client_role(&self, realm: &str, id: &str, role: &Role) -> Result<()> {
        self.call("create_client_role", &role.name)?;
        let role_id = self.id();
        self.mutate(realm, |data| {
            let roles = data.client_roles.entry(id.to_string()).or_default();
            if roles.iter().any(|r| r.name == role.name) {
                return Err(Error::keycloak(409, format!("role {} exists", role.name)));
            }
            roles.push(Role {
                id: Some(role_id),
                client_role: Some(true),
                ..role.clone()
            });
            Ok(())
        })
    }

    async fn update_client_role(&self, realm: &str, id: &str, role: &Role) -> Result<()> {
        self.call("update_client_role", &role.name)?;
        self.mutate(realm, |data| {
            let stored = data
                .client_roles
                .get_mut(id)
                .and_then(|roles| roles.iter_mut().find(|r| r.name == role.name))
                .ok_or_else(|| not_found(format!("role {}", role.name)))?;
            stored.description = role.description.clone();
            stored.composite = role.composite;
            Ok(())
        })
    }

    async fn delete_client_role(&self, realm: &str, id: &str, name: &str) -> Result<()> {
        self.call("delete_client_role", name)?;
        self.mutate(realm, |data| {
            if let Some(roles) = data.client_roles.get_mut(id) {
                roles.retain(|r| r.name != name);
            }
            Ok(())
        })
    }

    async fn list_client_scopes(&self, realm: &str) -> Result<Vec<ClientScope>> {
        self.call("list_client_scopes", realm)?;
        Ok(self.read(realm, |d| d.client_scopes.clone()))
    }

    async fn list_default_client_scopes(&self, realm: &str, id: &str) -> Result<Vec<ClientScope>> {
        self.call("list_default_client_scopes", id)?;
        Ok(self.read(realm, |d| {
            let ids = d.default_scopes.get(id).cloned().unwrap_or_default();
            d.client_scopes
                .iter()
                .filter(|s| s.id.as_ref().is_some_and(|sid| ids.contains(sid)))
                .cloned()
                .collect()
        }))
    }

    async fn add_default_client_scope(&self, realm: &str, id: &str, scope_id: &str) -> Result<()> {
        self.call("add_default_client_scope", scope_id)?;
        self.mutate(realm, |data| {
            data.default_scopes
                .entry(id.to_string())
                .or_default()
                .insert(scope_id.to_string());
            Ok(())
        })
    }

    async fn remove_default_client_scope(
        &self,
        realm: &str,
        id: &str,
        scope_id: &str,
    ) -> Result<()> {
        self.call("remove_default_client_scope", scope_id)?;
        self.mutate(realm, |data| {
            if let Some(scopes) = data.default_scopes.get_mut(id) {
                scopes.remove(scope_id);
            }
            Ok(())
        })
    }

    async fn find_user(&self, realm: &str, username: &str) -> Result<Option<User>> {
        self.call("find_user", username)?;
        Ok(self.user(realm, username))
    }

    async fn create_user(&self, realm: &str, user: &User) -> Result<String> {
        self.call("create_user", &user.username)?;
        let mut realms = self.realms.lock().unwrap();
        let data = realms
            .get_mut(realm)
            .ok_or_else(|| not_found(format!("realm {}", realm)))?;
        if data.users.iter().any(|u| u.username == user.username) {
            return Err(Error::keycloak(409, format!("user {} exists", user.username)));
        }
        Ok(self.insert_user(data, user))
    }

    async fn update_user(&self, realm: &str, user: &User) -> Result<()> {
        self.call("update_user", &user.username)?;
        self.mutate(realm, |data| {
            let stored = data
                .users
                .iter_mut()
                .find(|u| u.id.is_some() && u.id == user.id)
                .ok_or_else(|| not_found(format!("user {}", user.username)))?;
            let credentials = std::mem::take(&mut stored.credentials);
            *stored = User {
                credentials,
                realm_roles: Vec::new(),
                client_roles: BTreeMap::new(),
                groups: Vec::new(),
                ..user.clone()
            };
            Ok(())
        })
    }

    async fn delete_user(&self, realm: &str, id: &str) -> Result<()> {
        self.call("delete_user", id)?;
        self.mutate(realm, |data| {
            data.users.retain(|u| u.id.as_deref() != Some(id));
            data.memberships.remove(id);
            Ok(())
        })
    }

    async fn list_user_groups(&self, realm: &str, user_id: &str) -> Result<Vec<Group>> {
        self.call("list_user_groups", user_id)?;
        Ok(self.read(realm, |d| {
            let ids = d.memberships.get(user_id).cloned().unwrap_or_default();
            d.groups
                .iter()
                .filter(|g| g.id.as_ref().is_some_and(|id| ids.contains(id)))
                .cloned()
                .collect()
        }))
    }

    async fn add_user_to_group(&self, realm: &str, user_id: &str, group_id: &str) -> Result<()> {
        self.call("add_user_to_group", group_id)?;
        self.mutate(realm, |data| {
            if !data.groups.iter().any(|g| g.id.as_deref() == Some(group_id)) {
                return Err(not_found(format!("group {}", group_id)));
            }
            data.memberships
                .entry(user_id.to_string())
                .or_default()
                .insert(group_id.to_string());
            Ok(())
        })
    }

    async fn remove_user_from_group(
        &self,
        realm: &str,
        user_id: &str,
        group_id: &str,
    ) -> Result<()> {
        self.call("remove_user_from_group", group_id)?;
        self.mutate(realm, |data| {
            if let Some(groups) = data.memberships.get_mut(user_id) {
                groups.remove(group_id);
            }
            Ok(())
        })
    }

    async fn find_group(&self, realm: &str, name: &str) -> Result<Option<Group>> {
        self.call("find_group", name)?;
        Ok(self.group(realm, name))
    }

    async fn list_groups(&self, realm: &str) -> Result<Vec<Group>> {
        self.call("list_groups", realm)?;
        Ok(self.read(realm, |d| d.groups.clone()))
    }

    async fn create_group(&self, realm: &str, group: &Group) -> Result<String> {
        self.call("create_group", &group.name)?;
        let id = self.id();
        self.mutate(realm, |data| {
            if data.groups.iter().any(|g| g.name == group.name) {
                return Err(Error::keycloak(409, format!("group {} exists", group.name)));
            }
            data.groups.push(Group {
                id: Some(id.clone()),
                path: Some(format!("/{}", group.name)),
                realm_roles: Vec::new(),
                client_roles: BTreeMap::new(),
                ..group.clone()
            });
            Ok(id.clone())
        })
    }

    async fn update_group(&self, realm: &str, group: &Group) -> Result<()> {
        self.call("update_group", &group.name)?;
        self.mutate(realm, |data| {
            let stored = data
                .groups
                .iter_mut()
                .find(|g| g.id.is_some() && g.id == group.id)
                .ok_or_else(|| not_found(format!("group {}", group.name)))?;
            stored.name = group.name.clone();
            stored.attributes = group.attributes.clone();
            Ok(())
        })
    }

    async fn delete_group(&self, realm: &str, id: &str) -> Result<()> {
        self.call("delete_group", id)?;
        self.mutate(realm, |data| {
            data.groups.retain(|g| g.id.as_deref() != Some(id));
            for groups in data.memberships.values_mut() {
                groups.remove(id);
            }
            Ok(())
        })
    }

    async fn list_assigned_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
    ) -> Result<Vec<Role>> {
        self.call("list_assigned_roles", holder.id())?;
        Ok(self.read(realm, |d| {
            d.mappings
                .get(&(holder.id().to_string(), scope_key(scope)))
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn list_available_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
    ) -> Result<Vec<Role>> {
        self.call("list_available_roles", holder.id())?;
        Ok(self.read(realm, |d| {
            let assigned = d
                .mappings
                .get(&(holder.id().to_string(), scope_key(scope)))
                .cloned()
                .unwrap_or_default();
            let defined = match scope {
                RoleScope::Realm => d.realm_roles.clone(),
                RoleScope::Client { id, .. } => d.client_roles.get(id).cloned().unwrap_or_default(),
            };
            defined
                .into_iter()
                .filter(|r| !assigned.iter().any(|a| a.name == r.name))
                .collect()
        }))
    }

    async fn assign_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
        roles: &[Role],
    ) -> Result<()> {
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        self.call("assign_roles", &names.join(","))?;
        self.mutate(realm, |data| {
            let assigned = data
                .mappings
                .entry((holder.id().to_string(), scope_key(scope)))
                .or_default();
            for role in roles {
                if !assigned.iter().any(|a| a.name == role.name) {
                    assigned.push(role.clone());
                }
            }
            Ok(())
        })
    }

    async fn remove_roles(
        &self,
        realm: &str,
        holder: &RoleHolder,
        scope: &RoleScope,
        roles: &[Role],
    ) -> Result<()> {
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        self.call("remove_roles", &names.join(","))?;
        self.mutate(realm, |data| {
            if let Some(assigned) = data
                .mappings
                .get_mut(&(holder.id().to_string(), scope_key(scope)))
            {
                assigned.retain(|a| !roles.iter().any(|r| r.name == a.name));
            }
            Ok(())
        })
    }

    async fn list_identity_providers(&self, realm: &str) -> Result<Vec<IdentityProvider>> {
        self.call("list_identity_providers", realm)?;
        Ok(self.read(realm, |d| d.identity_providers.clone()))
    }

    async fn list_authentication_executions(
        &self,
        realm: &str,
        flow_alias: &str,
    ) -> Result<Vec<AuthenticationExecutionInfo>> {
        self.call("list_authentication_executions", flow_alias)?;
        Ok(self.read(realm, |d| d.executions.get(flow_alias).cloned().unwrap_or_default()))
    }

    async fn create_authenticator_config(
        &self,
        realm: &str,
        execution_id: &str,
        config: &AuthenticatorConfig,
    ) -> Result<()> {
        self.call("create_authenticator_config", &config.alias)?;
        let config_id = self.id();
        self.mutate(realm, |data| {
            let execution = data
                .executions
                .values_mut()
                .flatten()
                .find(|e| e.id.as_deref() == Some(execution_id))
                .ok_or_else(|| not_found(format!("execution {}", execution_id)))?;
            execution.authentication_config = Some(config_id.clone());
            data.authenticator_configs.push(AuthenticatorConfig {
                id: Some(config_id),
                ..config.clone()
            });
            Ok(())
        })
    }

    async fn update_authenticator_config(
        &self,
        realm: &str,
        config: &AuthenticatorConfig,
    ) -> Result<()> {
        self.call("update_authenticator_config", &config.alias)?;
        self.mutate(realm, |data| {
            let stored = data
                .authenticator_configs
                .iter_mut()
                .find(|c| c.id.is_some() && c.id == config.id)
                .ok_or_else(|| not_found(format!("authenticator config {}", config.alias)))?;
            *stored = config.clone();
            Ok(())
        })
    }
}
