//! Background discovery of optional resource kinds.
//!
//! One eager scan runs at startup and signals its completion through a
//! oneshot channel. A second task rescans on a fixed interval for the lifetime
//! of the process. Scans are serialized so a kind is never registered twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedSender;
use kube::api::{Api, DynamicObject, ListParams};
use kube::runtime::watcher;
use kube::Client;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::{CapabilityStore, CustomKind};
use crate::controller::error::{Error, Result};
use crate::health::HealthState;

/// Answers whether the cluster serves a kind.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KindDiscovery: Send + Sync {
    async fn kind_exists(&self, group_version: &str, kind: &str) -> Result<bool>;
}

/// Registers an extra watch for a newly discovered kind.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchRegistrar: Send + Sync {
    async fn register(&self, kind: CustomKind) -> Result<()>;
}

/// API discovery backed by the Kubernetes API server.
pub struct KubeKindDiscovery {
    client: Client,
}

impl KubeKindDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KindDiscovery for KubeKindDiscovery {
    async fn kind_exists(&self, group_version: &str, kind: &str) -> Result<bool> {
        match self.client.list_api_group_resources(group_version).await {
            Ok(list) => Ok(list.resources.iter().any(|r| r.kind == kind)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(Error::Kube(e)),
        }
    }
}

/// Watches a discovered kind and forwards every change as a trigger for the
/// Keycloak controller.
pub struct KubeWatchRegistrar {
    client: Client,
    namespace: Option<String>,
    trigger: UnboundedSender<()>,
}

impl KubeWatchRegistrar {
    pub fn new(client: Client, namespace: Option<String>, trigger: UnboundedSender<()>) -> Self {
        Self {
            client,
            namespace,
            trigger,
        }
    }
}

#[async_trait]
impl WatchRegistrar for KubeWatchRegistrar {
    async fn register(&self, kind: CustomKind) -> Result<()> {
        let ar = kind.api_resource();
        let api: Api<DynamicObject> = match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };

        // Fail registration now rather than inside the spawned watcher
        if let Err(e) = api.list_metadata(&ListParams::default().limit(1)).await {
            return Err(match e {
                kube::Error::Api(ref api_err) if api_err.code == 404 => {
                    Error::KindUnknown(kind.kind.to_string())
                }
                other => Error::Kube(other),
            });
        }

        let trigger = self.trigger.clone();
        tokio::spawn(async move {
            let mut events = watcher(api, watcher::Config::default()).boxed();
            while let Some(event) = events.next().await {
                match event {
                    Ok(watcher::Event::Apply(_)) | Ok(watcher::Event::Delete(_)) => {
                        if trigger.unbounded_send(()).is_err() {
                            debug!(kind = kind.kind, "Trigger receiver dropped, stopping watch");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(kind = kind.kind, error = %e, "Watch error"),
                }
            }
        });

        info!(kind = kind.kind, "Registered watch for optional kind");
        Ok(())
    }
}

/// Handles returned by [`CapabilityDetector::start`].
pub struct DetectorHandle {
    /// Resolves once the eager startup scan has finished.
    pub first_scan: oneshot::Receiver<()>,
    /// The periodic scan task.
    pub periodic: JoinHandle<()>,
}

/// Scans optional kinds and keeps the capability cache current.
pub struct CapabilityDetector {
    discovery: Arc<dyn KindDiscovery>,
    registrar: Arc<dyn WatchRegistrar>,
    cache: Arc<dyn CapabilityStore>,
    kinds: Vec<CustomKind>,
    interval: Duration,
    health: Option<Arc<HealthState>>,
    scan_lock: Mutex<()>,
}

impl CapabilityDetector {
    pub fn new(
        discovery: Arc<dyn KindDiscovery>,
        registrar: Arc<dyn WatchRegistrar>,
        cache: Arc<dyn CapabilityStore>,
        kinds: Vec<CustomKind>,
        interval: Duration,
    ) -> Self {
        Self {
            discovery,
            registrar,
            cache,
            kinds,
            interval,
            health: None,
            scan_lock: Mutex::new(()),
        }
    }

    /// Publish capability flags as metrics.
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Run one scan over every kind.
    ///
    /// A kind confirmed present is never downgraded: its watch stays
    /// registered for the life of the process. Discovery errors leave the
    /// cached value untouched and are retried on the next tick.
    pub async fn scan(&self) {
        let _guard = self.scan_lock.lock().await;

        for kind in &self.kinds {
            let exists = match self
                .discovery
                .kind_exists(&kind.group_version(), kind.kind)
                .await
            {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(kind = kind.kind, error = %e, "Capability discovery failed");
                    continue;
                }
            };

            let cached = self.cache.get(kind.key);
            if exists {
                // Only a watched kind is reported present
                if cached != Some(true) {
                    match self.registrar.register(*kind).await {
                        Ok(()) => {
                            self.cache.set(kind.key, true);
                            info!(kind = kind.kind, "Optional kind available");
                        }
                        Err(e) => {
                            warn!(kind = kind.kind, error = %e, "Watch registration failed, will retry");
                            self.cache.set(kind.key, false);
                        }
                    }
                }
            } else if cached.is_none() {
                debug!(kind = kind.kind, "Optional kind not available");
                self.cache.set(kind.key, false);
            }

            if let Some(health) = &self.health {
                health
                    .metrics
                    .set_capability(kind.key, self.cache.is_present(kind.key));
            }
        }
    }

    /// Spawn the eager and periodic scans.
    pub fn start(self: Arc<Self>) -> DetectorHandle {
        let (tx, rx) = oneshot::channel();

        let eager = self.clone();
        tokio::spawn(async move {
            eager.scan().await;
            let _ = tx.send(());
        });

        let periodic = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.scan().await;
            }
        });

        DetectorHandle {
            first_scan: rx,
            periodic,
        }
    }
}
