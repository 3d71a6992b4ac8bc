//! Cluster access for integration tests.

use std::sync::Once;

use kube::Client;
use tokio::sync::OnceCell;

static REACHABLE: OnceCell<()> = OnceCell::const_new();
static TRACING: Once = Once::new();

/// A client for one test.
///
/// The first call checks that the API server answers so a missing cluster
/// fails with one clear message instead of a timeout per test.
pub async fn test_client() -> Client {
    let client = Client::try_default()
        .await
        .expect("no usable kubeconfig or in-cluster config");
    REACHABLE
        .get_or_init(|| async {
            let version = client
                .apiserver_version()
                .await
                .expect("Kubernetes API server is not reachable");
            tracing::info!(version = %version.git_version, "Using test cluster");
        })
        .await;
    client
}

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("keycloak_operator=debug,kube=info")
            .try_init();
    });
}
