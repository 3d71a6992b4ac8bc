// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for whole reconcile cycles.
//!
//! Each test reads state, reconciles and runs the resulting actions against
//! in-memory fakes of the Kubernetes and Keycloak admin APIs, then repeats
//! the cycle to check that it converges. No cluster is needed.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_realm_converges
//! ```

#[path = "../common/mod.rs"]
mod common;

mod backup_tests;
mod client_tests;
mod group_tests;
mod server_tests;
mod user_tests;

use std::sync::Arc;

use keycloak_operator::action::{ClusterAction, ClusterActionRunner, DesiredClusterState};
use keycloak_operator::controller::error::Result;
use keycloak_operator::store::ManagedResource;

use common::fakes::{FakeKeycloak, InMemoryStore};

/// Fresh fakes: an empty store and a server without realms.
pub fn fakes() -> (Arc<FakeKeycloak>, Arc<InMemoryStore>) {
    (Arc::new(FakeKeycloak::new()), Arc::new(InMemoryStore::new()))
}

/// Run actions the way a controller does.
pub async fn apply(
    desired: &DesiredClusterState,
    api: &Arc<FakeKeycloak>,
    store: &Arc<InMemoryStore>,
) -> Result<()> {
    ClusterActionRunner::new(store.clone())
        .with_keycloak(api.clone())
        .run_all(desired)
        .await
}

/// Run actions that only touch the store.
pub async fn apply_to_store(desired: &DesiredClusterState, store: &Arc<InMemoryStore>) -> Result<()> {
    ClusterActionRunner::new(store.clone())
        .run_all(desired)
        .await
}

/// Whether any action creates or deletes something.
pub fn creates_or_deletes(desired: &DesiredClusterState) -> bool {
    desired.iter().any(|a| {
        let name = a.name();
        name.starts_with("Create") || name.starts_with("Delete")
    })
}

/// Kind and name of every object an action list writes.
pub fn written(desired: &DesiredClusterState) -> Vec<String> {
    desired
        .iter()
        .filter_map(|a| match a {
            ClusterAction::CreateResource(r) | ClusterAction::UpdateResource(r) => {
                Some(format!("{} {}", r.kind(), r.name()))
            }
            _ => None,
        })
        .collect()
}

pub fn created_resources(desired: &DesiredClusterState) -> Vec<&ManagedResource> {
    desired
        .iter()
        .filter_map(|a| match a {
            ClusterAction::CreateResource(r) => Some(r),
            _ => None,
        })
        .collect()
}
