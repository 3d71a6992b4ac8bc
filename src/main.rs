//! keycloak-operator entry point.
//!
//! Only one replica reconciles at a time: every replica serves health checks,
//! but the controllers start once this process holds the leader lease, and
//! the process exits as soon as it loses it.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use keycloak_operator::OperatorConfig;
use keycloak_operator::health::{HealthState, run_health_server};
use keycloak_operator::run_operator;

const LEASE_NAME: &str = "keycloak-operator-lock";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to running reconciles after a termination signal.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keycloak_operator=info".parse()?)
                .add_directive("kube=warn".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        keycloak_image = %config.images.keycloak,
        "Starting keycloak-operator"
    );

    let client = Client::try_default().await?;
    let health = Arc::new(HealthState::new());
    let health_server = spawn_health_server(health.clone(), config.health_port);

    let (holder, lease_namespace) = pod_identity();
    let lease = lease_lock(&client, &lease_namespace, &holder);
    info!(holder = %holder, namespace = %lease_namespace, lease = LEASE_NAME, "Waiting for leadership");
    acquire_leadership(&lease).await;
    let lease_keeper = spawn_lease_keeper(lease);

    let controllers = {
        let health = health.clone();
        tokio::spawn(run_operator(client, config, Some(health)))
    };

    tokio::select! {
        result = controllers => {
            if let Err(e) = result {
                error!(error = %e, "Controllers panicked");
            }
        }
        result = health_server => {
            if let Err(e) = result {
                error!(error = %e, "Health server panicked");
            }
        }
        Err(e) = lease_keeper => {
            error!(error = %e, "Lease renewal panicked");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            health.set_ready(false);
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Lease holder id and the namespace the lease lives in.
///
/// Both come from the downward API; outside a pod the hostname and the
/// `default` namespace are used.
fn pod_identity() -> (String, String) {
    let holder = std::env::var("POD_NAME").unwrap_or_else(|_| {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "keycloak-operator".to_string());
        warn!(holder = %host, "POD_NAME not set, using hostname");
        host
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using default");
        "default".to_string()
    });
    (holder, namespace)
}

fn lease_lock(client: &Client, namespace: &str, holder: &str) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        namespace,
        LeaseLockParams {
            holder_id: holder.to_string(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

async fn acquire_leadership(lease: &LeaseLock) {
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another replica holds the lease"),
            Err(e) => warn!(error = %e, "Lease request failed"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease forever. Losing it ends the process so the pod restarts
/// as a follower.
#[allow(clippy::exit)]
fn spawn_lease_keeper(lease: LeaseLock) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
            match lease.try_acquire_or_renew().await {
                Ok(LeaseLockResult::Acquired(_)) => {}
                Ok(_) => {
                    error!("Leadership lost, exiting");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Lease renewal failed, exiting");
                    std::process::exit(1);
                }
            }
        }
    })
}

fn spawn_health_server(health: Arc<HealthState>, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health, port).await {
            error!(error = %e, port, "Health server failed");
        }
    })
}

/// Resolves on SIGINT or SIGTERM.
///
/// Without signal handlers there is no graceful shutdown at all, so failing
/// to install them is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
