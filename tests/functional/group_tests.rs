//! Group cycles: creation, realm role mappings and deletion.

use std::sync::Arc;

use keycloak_operator::action::DesiredClusterState;
use keycloak_operator::crd::KeycloakGroup;
use keycloak_operator::reconcile::GroupReconciler;
use keycloak_operator::state::GroupState;

use crate::common::fakes::{FakeKeycloak, InMemoryStore};
use crate::common::fixtures::{deleting, group_cr};
use crate::{apply, creates_or_deletes, fakes};

async fn cycle(cr: &KeycloakGroup, api: &Arc<FakeKeycloak>) -> DesiredClusterState {
    let state = GroupState::read(cr, "demo", api.as_ref()).await.unwrap();
    GroupReconciler::new(cr, &state, "demo").reconcile()
}

fn setup() -> (Arc<FakeKeycloak>, Arc<InMemoryStore>) {
    let (api, store) = fakes();
    api.seed_realm("demo");
    api.seed_realm_role("demo", "viewer");
    api.seed_realm_role("demo", "editor");
    (api, store)
}

#[tokio::test]
async fn test_group_created_then_roles_mapped() {
    let (api, store) = setup();
    let cr = group_cr("staff", &["viewer"]);

    let desired = cycle(&cr, &api).await;
    assert_eq!(desired.names(), ["Ping", "CreateGroup"]);
    apply(&desired, &api, &store).await.unwrap();
    let id = api.group("demo", "staff").unwrap().id.unwrap();

    let desired = cycle(&cr, &api).await;
    assert_eq!(desired.names(), ["Ping", "UpdateGroup", "AssignRole"]);
    apply(&desired, &api, &store).await.unwrap();
    assert_eq!(api.assigned_role_names("demo", &id, "realm"), ["viewer"]);

    let desired = cycle(&cr, &api).await;
    assert_eq!(desired.names(), ["Ping", "UpdateGroup"]);
    assert!(!creates_or_deletes(&desired));
    // Groups own no Kubernetes objects
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_group_role_swapped() {
    let (api, store) = setup();
    let mut cr = group_cr("staff", &["viewer"]);
    for _ in 0..2 {
        apply(&cycle(&cr, &api).await, &api, &store).await.unwrap();
    }

    cr.spec.group.realm_roles = vec!["editor".to_string()];
    let desired = cycle(&cr, &api).await;
    assert_eq!(
        desired.names(),
        ["Ping", "UpdateGroup", "AssignRole", "RemoveRole"]
    );
    apply(&desired, &api, &store).await.unwrap();

    let id = api.group("demo", "staff").unwrap().id.unwrap();
    assert_eq!(api.assigned_role_names("demo", &id, "realm"), ["editor"]);
}

#[tokio::test]
async fn test_deleted_group_is_removed() {
    let (api, store) = setup();
    let cr = group_cr("staff", &[]);
    apply(&cycle(&cr, &api).await, &api, &store).await.unwrap();

    let cr = deleting(cr);
    let desired = cycle(&cr, &api).await;
    assert_eq!(desired.names(), ["Ping", "DeleteGroup"]);
    apply(&desired, &api, &store).await.unwrap();
    assert!(api.group("demo", "staff").is_none());

    let desired = cycle(&cr, &api).await;
    assert_eq!(desired.names(), ["Ping"]);
}
