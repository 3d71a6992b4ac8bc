//! Health and metrics endpoints.
//!
//! `/healthz` answers as long as the process runs, `/readyz` only once this
//! replica leads and its controllers are started, and `/metrics` serves the
//! Prometheus text exposition of [`Metrics`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::{Metric, Registry};
use tracing::{error, info};

const PREFIX: &str = "keycloak_operator";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ObjectLabels {
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ActionLabels {
    action: String,
    outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CapabilityLabels {
    capability: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ServerLabels {
    namespace: String,
    name: String,
}

impl ObjectLabels {
    fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Operator metrics, registered under the `keycloak_operator_` prefix.
pub struct Metrics {
    reconciles: Family<ObjectLabels, Counter>,
    reconcile_errors: Family<ObjectLabels, Counter>,
    reconcile_seconds: Family<ObjectLabels, Histogram>,
    last_reconcile: Gauge,
    actions: Family<ActionLabels, Counter>,
    capabilities: Family<CapabilityLabels, Gauge>,
    desired_replicas: Family<ServerLabels, Gauge>,
    ready_replicas: Family<ServerLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn register<M: Metric + Clone>(registry: &mut Registry, name: &str, help: &str, metric: M) -> M {
    registry.register(name, help, metric.clone());
    metric
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(PREFIX);
        let r = &mut registry;

        let reconciles = register(r, "reconciliations", "Completed reconcile cycles", Family::default());
        let reconcile_errors = register(
            r,
            "reconciliation_errors",
            "Reconcile cycles that ended in an error",
            Family::default(),
        );
        let reconcile_seconds = register(
            r,
            "reconcile_duration_seconds",
            "Wall time of a reconcile cycle",
            Family::<ObjectLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 14))
            }),
        );
        let last_reconcile = register(
            r,
            "last_reconcile_timestamp_seconds",
            "Unix time of the last completed reconcile cycle",
            Gauge::default(),
        );
        let actions = register(r, "actions", "Applied actions by variant and outcome", Family::default());
        let capabilities = register(
            r,
            "capability_present",
            "1 when an optional resource kind is served by the cluster",
            Family::default(),
        );
        let desired_replicas = register(
            r,
            "server_replicas_desired",
            "Keycloak pods requested per server",
            Family::default(),
        );
        let ready_replicas = register(
            r,
            "server_replicas_ready",
            "Keycloak pods ready per server",
            Family::default(),
        );

        Self {
            reconciles,
            reconcile_errors,
            reconcile_seconds,
            last_reconcile,
            actions,
            capabilities,
            desired_replicas,
            ready_replicas,
            registry,
        }
    }

    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, seconds: f64) {
        let labels = ObjectLabels::new(kind, namespace, name);
        self.reconciles.get_or_create(&labels).inc();
        self.reconcile_seconds.get_or_create(&labels).observe(seconds);
        self.last_reconcile.set(jiff::Timestamp::now().as_second());
    }

    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        self.reconcile_errors
            .get_or_create(&ObjectLabels::new(kind, namespace, name))
            .inc();
    }

    pub fn record_action(&self, action: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.actions
            .get_or_create(&ActionLabels {
                action: action.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn set_capability(&self, capability: &str, present: bool) {
        self.capabilities
            .get_or_create(&CapabilityLabels {
                capability: capability.to_string(),
            })
            .set(i64::from(present));
    }

    pub fn set_instance_replicas(&self, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = ServerLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.desired_replicas.get_or_create(&labels).set(desired);
        self.ready_replicas.get_or_create(&labels).set(ready);
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> String {
        let mut body = String::new();
        if let Err(e) = encode(&mut body, &self.registry) {
            error!(error = %e, "Metrics encoding failed");
            body.clear();
        }
        body
    }
}

/// State shared by the health handlers and the controllers.
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
}

impl HealthState {
    /// Starts out not ready.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.encode(),
    )
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health endpoints on all interfaces until the listener fails.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Health server listening");
    axum::serve(listener, router(state)).await
}
