//! Kubernetes resource store used by state readers and the action runner.
//!
//! [`ManagedResource`] is a closed set of the object kinds the operator owns.
//! Optional kinds that are only served by some clusters (Routes, Prometheus
//! and Grafana objects) travel as [`DynamicObject`]s tagged with their
//! [`CustomKind`].

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::capability::CustomKind;
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::KeycloakBackup;

/// A kind the resource store can read and write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Secret,
    Service,
    StatefulSet,
    Deployment,
    PersistentVolumeClaim,
    Ingress,
    PodDisruptionBudget,
    Job,
    CronJob,
    Endpoints,
    KeycloakBackup,
    Custom(CustomKind),
}

impl ResourceKind {
    /// Kind name as it appears in manifests and the status ledger.
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Secret => "Secret",
            ResourceKind::Service => "Service",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::PodDisruptionBudget => "PodDisruptionBudget",
            ResourceKind::Job => "Job",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::Endpoints => "Endpoints",
            ResourceKind::KeycloakBackup => "KeycloakBackup",
            ResourceKind::Custom(custom) => custom.kind,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// An object the operator creates, updates or deletes.
#[derive(Clone, Debug)]
pub enum ManagedResource {
    Secret(Secret),
    Service(Service),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Ingress(Ingress),
    PodDisruptionBudget(PodDisruptionBudget),
    Job(Job),
    CronJob(CronJob),
    Endpoints(Endpoints),
    KeycloakBackup(KeycloakBackup),
    Custom {
        kind: CustomKind,
        object: DynamicObject,
    },
}

/// Typed objects that can be wrapped in a [`ManagedResource`].
pub trait Managed: Sized {
    const KIND: ResourceKind;

    fn into_managed(self) -> ManagedResource;

    fn from_managed(resource: ManagedResource) -> Option<Self>;
}

macro_rules! managed_kind {
    ($ty:ident) => {
        impl Managed for $ty {
            const KIND: ResourceKind = ResourceKind::$ty;

            fn into_managed(self) -> ManagedResource {
                ManagedResource::$ty(self)
            }

            fn from_managed(resource: ManagedResource) -> Option<Self> {
                match resource {
                    ManagedResource::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

managed_kind!(Secret);
managed_kind!(Service);
managed_kind!(StatefulSet);
managed_kind!(Deployment);
managed_kind!(PersistentVolumeClaim);
managed_kind!(Ingress);
managed_kind!(PodDisruptionBudget);
managed_kind!(Job);
managed_kind!(CronJob);
managed_kind!(Endpoints);
managed_kind!(KeycloakBackup);

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedResource::Secret(_) => ResourceKind::Secret,
            ManagedResource::Service(_) => ResourceKind::Service,
            ManagedResource::StatefulSet(_) => ResourceKind::StatefulSet,
            ManagedResource::Deployment(_) => ResourceKind::Deployment,
            ManagedResource::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            ManagedResource::Ingress(_) => ResourceKind::Ingress,
            ManagedResource::PodDisruptionBudget(_) => ResourceKind::PodDisruptionBudget,
            ManagedResource::Job(_) => ResourceKind::Job,
            ManagedResource::CronJob(_) => ResourceKind::CronJob,
            ManagedResource::Endpoints(_) => ResourceKind::Endpoints,
            ManagedResource::KeycloakBackup(_) => ResourceKind::KeycloakBackup,
            ManagedResource::Custom { kind, .. } => ResourceKind::Custom(*kind),
        }
    }

    fn meta(&self) -> &kube::core::ObjectMeta {
        match self {
            ManagedResource::Secret(o) => o.meta(),
            ManagedResource::Service(o) => o.meta(),
            ManagedResource::StatefulSet(o) => o.meta(),
            ManagedResource::Deployment(o) => o.meta(),
            ManagedResource::PersistentVolumeClaim(o) => o.meta(),
            ManagedResource::Ingress(o) => o.meta(),
            ManagedResource::PodDisruptionBudget(o) => o.meta(),
            ManagedResource::Job(o) => o.meta(),
            ManagedResource::CronJob(o) => o.meta(),
            ManagedResource::Endpoints(o) => o.meta(),
            ManagedResource::KeycloakBackup(o) => o.meta(),
            ManagedResource::Custom { object, .. } => &object.metadata,
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> String {
        self.meta().namespace.clone().unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<String> {
        self.meta().resource_version.clone()
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind(),
            namespace: self.namespace(),
            name: self.name(),
        }
    }
}

/// Read typed objects through a [`ResourceStore`].
pub async fn get_typed<T: Managed>(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> Result<Option<T>> {
    Ok(store
        .get(T::KIND, namespace, name)
        .await?
        .and_then(T::from_managed))
}

/// Read an optional-kind object through a [`ResourceStore`].
pub async fn get_custom(
    store: &dyn ResourceStore,
    kind: CustomKind,
    namespace: &str,
    name: &str,
) -> Result<Option<DynamicObject>> {
    Ok(
        match store.get(ResourceKind::Custom(kind), namespace, name).await? {
            Some(ManagedResource::Custom { object, .. }) => Some(object),
            _ => None,
        },
    )
}

/// Get/list/create/update/delete over the kinds in [`ResourceKind`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one object. `Ok(None)` when it does not exist.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>>;

    /// List objects matching a label selector.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>>;

    async fn create(&self, resource: &ManagedResource) -> Result<()>;

    /// Replace an object. The payload must carry the observed resourceVersion.
    async fn update(&self, resource: &ManagedResource) -> Result<()>;

    /// Delete an object. Deleting something that is already gone succeeds.
    async fn delete(&self, reference: &ResourceRef) -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

/// Map a store error, separating an unknown kind from a missing object.
fn classify(kind: ResourceKind, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(e)
            if e.code == 404 && e.message.contains("could not find the requested resource") =>
        {
            Error::KindUnknown(kind.name().to_string())
        }
        _ => Error::Kube(err),
    }
}

fn is_object_missing(err: &Error) -> bool {
    matches!(err, Error::Kube(kube::Error::Api(e)) if e.code == 404)
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn typed_api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic_api(&self, kind: CustomKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    async fn get_object<K>(&self, namespace: &str, name: &str) -> Result<Option<ManagedResource>>
    where
        K: Managed
            + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        match self.typed_api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj.into_managed())),
            Err(e) => {
                let err = classify(K::KIND, e);
                if is_object_missing(&err) {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn list_objects<K>(&self, namespace: &str, selector: &str) -> Result<Vec<ManagedResource>>
    where
        K: Managed
            + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let list = self
            .typed_api::<K>(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| classify(K::KIND, e))?;
        Ok(list.items.into_iter().map(Managed::into_managed).collect())
    }

    async fn create_object<K>(&self, obj: &K) -> Result<()>
    where
        K: Managed
            + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::MissingField(format!("{} metadata.namespace", K::KIND)))?;
        self.typed_api::<K>(&namespace)
            .create(&post_params(), obj)
            .await
            .map_err(|e| classify(K::KIND, e))?;
        Ok(())
    }

    async fn update_object<K>(&self, obj: &K) -> Result<()>
    where
        K: Managed
            + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::MissingField(format!("{} metadata.namespace", K::KIND)))?;
        self.typed_api::<K>(&namespace)
            .replace(&obj.name_any(), &post_params(), obj)
            .await
            .map_err(|e| classify(K::KIND, e))?;
        Ok(())
    }

    async fn delete_object<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Managed
            + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        match self
            .typed_api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(kind = %K::KIND, name, "Already deleted");
                Ok(())
            }
            Err(e) => Err(classify(K::KIND, e)),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>> {
        match kind {
            ResourceKind::Secret => self.get_object::<Secret>(namespace, name).await,
            ResourceKind::Service => self.get_object::<Service>(namespace, name).await,
            ResourceKind::StatefulSet => self.get_object::<StatefulSet>(namespace, name).await,
            ResourceKind::Deployment => self.get_object::<Deployment>(namespace, name).await,
            ResourceKind::PersistentVolumeClaim => {
                self.get_object::<PersistentVolumeClaim>(namespace, name)
                    .await
            }
            ResourceKind::Ingress => self.get_object::<Ingress>(namespace, name).await,
            ResourceKind::PodDisruptionBudget => {
                self.get_object::<PodDisruptionBudget>(namespace, name)
                    .await
            }
            ResourceKind::Job => self.get_object::<Job>(namespace, name).await,
            ResourceKind::CronJob => self.get_object::<CronJob>(namespace, name).await,
            ResourceKind::Endpoints => self.get_object::<Endpoints>(namespace, name).await,
            ResourceKind::KeycloakBackup => {
                self.get_object::<KeycloakBackup>(namespace, name).await
            }
            ResourceKind::Custom(custom) => {
                match self.dynamic_api(custom, namespace).get(name).await {
                    Ok(object) => Ok(Some(ManagedResource::Custom {
                        kind: custom,
                        object,
                    })),
                    Err(e) => {
                        let err = classify(kind, e);
                        if is_object_missing(&err) {
                            Ok(None)
                        } else {
                            Err(err)
                        }
                    }
                }
            }
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>> {
        match kind {
            ResourceKind::Secret => self.list_objects::<Secret>(namespace, selector).await,
            ResourceKind::Service => self.list_objects::<Service>(namespace, selector).await,
            ResourceKind::StatefulSet => {
                self.list_objects::<StatefulSet>(namespace, selector).await
            }
            ResourceKind::Deployment => self.list_objects::<Deployment>(namespace, selector).await,
            ResourceKind::PersistentVolumeClaim => {
                self.list_objects::<PersistentVolumeClaim>(namespace, selector)
                    .await
            }
            ResourceKind::Ingress => self.list_objects::<Ingress>(namespace, selector).await,
            ResourceKind::PodDisruptionBudget => {
                self.list_objects::<PodDisruptionBudget>(namespace, selector)
                    .await
            }
            ResourceKind::Job => self.list_objects::<Job>(namespace, selector).await,
            ResourceKind::CronJob => self.list_objects::<CronJob>(namespace, selector).await,
            ResourceKind::Endpoints => self.list_objects::<Endpoints>(namespace, selector).await,
            ResourceKind::KeycloakBackup => {
                self.list_objects::<KeycloakBackup>(namespace, selector)
                    .await
            }
            ResourceKind::Custom(custom) => {
                let list = self
                    .dynamic_api(custom, namespace)
                    .list(&ListParams::default().labels(selector))
                    .await
                    .map_err(|e| classify(kind, e))?;
                Ok(list
                    .items
                    .into_iter()
                    .map(|object| ManagedResource::Custom {
                        kind: custom,
                        object,
                    })
                    .collect())
            }
        }
    }

    async fn create(&self, resource: &ManagedResource) -> Result<()> {
        match resource {
            ManagedResource::Secret(o) => self.create_object(o).await,
            ManagedResource::Service(o) => self.create_object(o).await,
            ManagedResource::StatefulSet(o) => self.create_object(o).await,
            ManagedResource::Deployment(o) => self.create_object(o).await,
            ManagedResource::PersistentVolumeClaim(o) => self.create_object(o).await,
            ManagedResource::Ingress(o) => self.create_object(o).await,
            ManagedResource::PodDisruptionBudget(o) => self.create_object(o).await,
            ManagedResource::Job(o) => self.create_object(o).await,
            ManagedResource::CronJob(o) => self.create_object(o).await,
            ManagedResource::Endpoints(o) => self.create_object(o).await,
            ManagedResource::KeycloakBackup(o) => self.create_object(o).await,
            ManagedResource::Custom { kind, object } => {
                let namespace = resource.namespace();
                self.dynamic_api(*kind, &namespace)
                    .create(&post_params(), object)
                    .await
                    .map_err(|e| classify(resource.kind(), e))?;
                Ok(())
            }
        }
    }

    async fn update(&self, resource: &ManagedResource) -> Result<()> {
        match resource {
            ManagedResource::Secret(o) => self.update_object(o).await,
            ManagedResource::Service(o) => self.update_object(o).await,
            ManagedResource::StatefulSet(o) => self.update_object(o).await,
            ManagedResource::Deployment(o) => self.update_object(o).await,
            ManagedResource::PersistentVolumeClaim(o) => self.update_object(o).await,
            ManagedResource::Ingress(o) => self.update_object(o).await,
            ManagedResource::PodDisruptionBudget(o) => self.update_object(o).await,
            ManagedResource::Job(o) => self.update_object(o).await,
            ManagedResource::CronJob(o) => self.update_object(o).await,
            ManagedResource::Endpoints(o) => self.update_object(o).await,
            ManagedResource::KeycloakBackup(o) => self.update_object(o).await,
            ManagedResource::Custom { kind, object } => {
                let namespace = resource.namespace();
                self.dynamic_api(*kind, &namespace)
                    .replace(&resource.name(), &post_params(), object)
                    .await
                    .map_err(|e| classify(resource.kind(), e))?;
                Ok(())
            }
        }
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        let (ns, name) = (reference.namespace.as_str(), reference.name.as_str());
        match reference.kind {
            ResourceKind::Secret => self.delete_object::<Secret>(ns, name).await,
            ResourceKind::Service => self.delete_object::<Service>(ns, name).await,
            ResourceKind::StatefulSet => self.delete_object::<StatefulSet>(ns, name).await,
            ResourceKind::Deployment => self.delete_object::<Deployment>(ns, name).await,
            ResourceKind::PersistentVolumeClaim => {
                self.delete_object::<PersistentVolumeClaim>(ns, name).await
            }
            ResourceKind::Ingress => self.delete_object::<Ingress>(ns, name).await,
            ResourceKind::PodDisruptionBudget => {
                self.delete_object::<PodDisruptionBudget>(ns, name).await
            }
            ResourceKind::Job => self.delete_object::<Job>(ns, name).await,
            ResourceKind::CronJob => self.delete_object::<CronJob>(ns, name).await,
            ResourceKind::Endpoints => self.delete_object::<Endpoints>(ns, name).await,
            ResourceKind::KeycloakBackup => self.delete_object::<KeycloakBackup>(ns, name).await,
            ResourceKind::Custom(custom) => {
                match self
                    .dynamic_api(custom, ns)
                    .delete(name, &DeleteParams::background())
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                    Err(e) => Err(classify(reference.kind, e)),
                }
            }
        }
    }
}
