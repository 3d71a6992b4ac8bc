//! keycloak-operator library crate
//!
//! Reconciles Keycloak servers, realms, clients, users, groups and backups.
//! Every cycle reads the observed state, computes an ordered list of actions
//! and runs it; this module wires the controllers that host those cycles.

pub mod action;
pub mod capability;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod keycloak;
pub mod migrate;
pub mod reconcile;
pub mod resources;
pub mod state;
pub mod store;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::controller::Error as ControllerError;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use capability::{
    CapabilityCache, CapabilityDetector, KubeKindDiscovery, KubeWatchRegistrar, OPTIONAL_KINDS,
};
use controller::context::Context;
use controller::error::Error;
use controller::keycloak_controller;
use controller::resource_controller::{self, ManagedCustomResource};
use crd::{Keycloak, KeycloakBackup, KeycloakClient, KeycloakGroup, KeycloakRealm, KeycloakUser};

/// An API over one namespace, or over all of them when `namespace` is unset.
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Watcher settings shared by every controller.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Cached watch over `K` that only yields objects whose generation moved,
/// so the status writes of a cycle do not trigger the next one.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation, Default::default());
    (reader, stream)
}

type ReconcileResult<K> =
    Result<(ObjectRef<K>, kube::runtime::controller::Action), ControllerError<Error, watcher::Error>>;

/// Log the outcome of one reconcile.
///
/// Owned objects keep firing for a while after their owner is gone, so
/// not-found failures are only worth a debug line.
async fn log_result<K>(kind: &'static str, result: ReconcileResult<K>)
where
    K: Resource,
{
    match result {
        Ok((obj, _action)) => {
            debug!(kind, name = %obj.name, "Reconciled");
        }
        Err(e) => {
            let is_not_found = match &e {
                ControllerError::ObjectNotFound(_) => true,
                ControllerError::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!(kind, error = ?e, "Object already gone");
            } else {
                error!(kind, error = ?e, "Reconcile failed");
            }
        }
    }
}

/// Run the Keycloak server controller.
///
/// Besides its own objects, every change to a watched optional kind (sent
/// on `capability_changes`) reconciles all servers.
async fn run_keycloak_controller(
    ctx: Arc<Context>,
    namespace: Option<&str>,
    capability_changes: mpsc::UnboundedReceiver<()>,
) {
    let client = ctx.client.clone();
    let watcher_config = default_watcher_config();
    let keycloaks: Api<Keycloak> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let secrets: Api<Secret> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client, namespace);
    let (reader, stream) = create_filtered_stream(keycloaks, watcher_config.clone());

    // Only the StatefulSet is read in full (for ready replicas); the rest
    // just need to trigger a reconcile when they change.
    Controller::for_stream(stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(secrets, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(deployments, watcher_config).touched_objects())
        .reconcile_all_on(capability_changes)
        .run(keycloak_controller::reconcile, keycloak_controller::error_policy, ctx)
        .for_each(|result| log_result("Keycloak", result))
        .await;

    error!("Keycloak controller stream ended unexpectedly");
}

/// Run the controller for one of the kinds sharing the resource loop.
///
/// `owns` adds watches on the objects the kind writes to the store.
async fn run_resource_controller<K, F>(ctx: Arc<Context>, namespace: Option<&str>, owns: F)
where
    K: ManagedCustomResource,
    F: FnOnce(Controller<K>, &Client, WatcherConfig) -> Controller<K>,
{
    let client = ctx.client.clone();
    let watcher_config = default_watcher_config();
    let api: Api<K> = scoped_api(client.clone(), namespace);
    let (reader, stream) = create_filtered_stream(api, watcher_config.clone());

    owns(Controller::for_stream(stream, reader), &client, watcher_config)
        .run(
            resource_controller::reconcile::<K>,
            resource_controller::error_policy::<K>,
            ctx,
        )
        .for_each(|result| log_result(K::KIND, result))
        .await;

    error!(kind = K::KIND, "Controller stream ended unexpectedly");
}

/// Watch the Secrets a kind writes (credential and client secrets).
fn owns_secrets<K: ManagedCustomResource>(
    controller: Controller<K>,
    client: &Client,
    namespace: Option<&str>,
    watcher_config: WatcherConfig,
) -> Controller<K> {
    let secrets = scoped_api::<Secret>(client.clone(), namespace);
    controller.owns_stream(metadata_watcher(secrets, watcher_config).touched_objects())
}

/// Start the capability detector and every controller.
///
/// Controllers start once the first capability scan has finished, so the
/// first server cycle already knows which optional kinds exist. This only
/// returns if a controller stream ends.
pub async fn run_operator(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    info!(scope = %scope_msg, "Starting controllers");

    let capabilities = Arc::new(CapabilityCache::new());
    let (trigger, capability_changes) = mpsc::unbounded();
    let mut detector = CapabilityDetector::new(
        Arc::new(KubeKindDiscovery::new(client.clone())),
        Arc::new(KubeWatchRegistrar::new(client.clone(), namespace.clone(), trigger)),
        capabilities.clone(),
        OPTIONAL_KINDS.to_vec(),
        config.capability_scan_interval(),
    );
    if let Some(health) = &health_state {
        detector = detector.with_health(health.clone());
    }
    let detector = Arc::new(detector).start();
    if detector.first_scan.await.is_err() {
        error!("Initial capability scan did not complete");
    }

    if let Some(ref state) = health_state {
        state.set_ready(true);
    }

    let ctx = Arc::new(Context::new(client, config, capabilities, health_state));
    let ns = namespace.as_deref();

    tokio::join!(
        run_keycloak_controller(ctx.clone(), ns, capability_changes),
        run_resource_controller::<KeycloakRealm, _>(ctx.clone(), ns, |c, client, wc| {
            owns_secrets(c, client, ns, wc)
        }),
        run_resource_controller::<KeycloakClient, _>(ctx.clone(), ns, |c, client, wc| {
            owns_secrets(c, client, ns, wc)
        }),
        run_resource_controller::<KeycloakUser, _>(ctx.clone(), ns, |c, client, wc| {
            owns_secrets(c, client, ns, wc)
        }),
        run_resource_controller::<KeycloakGroup, _>(ctx.clone(), ns, |c, _, _| c),
        run_resource_controller::<KeycloakBackup, _>(ctx, ns, |c, client, wc| {
            let jobs = scoped_api::<Job>(client.clone(), ns);
            let cronjobs = scoped_api::<CronJob>(client.clone(), ns);
            c.owns_stream(metadata_watcher(jobs, wc.clone()).touched_objects())
                .owns_stream(metadata_watcher(cronjobs, wc).touched_objects())
        }),
    );

    detector.periodic.abort();
}
