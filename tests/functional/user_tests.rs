//! User cycles: creation with a credential secret, role mappings and group
//! membership.

use std::sync::Arc;

use keycloak_operator::action::{ClusterAction, DesiredClusterState};
use keycloak_operator::crd::KeycloakUser;
use keycloak_operator::keycloak::{KeycloakApi, RoleScope};
use keycloak_operator::reconcile::UserReconciler;
use keycloak_operator::resources::secrets::secret_string;
use keycloak_operator::state::UserState;
use keycloak_operator::store::{ManagedResource, ResourceKind};

use crate::common::fakes::{FakeKeycloak, InMemoryStore};
use crate::common::fixtures::{NAMESPACE, deleting, user, user_cr};
use crate::{apply, creates_or_deletes, fakes};

const ALICE_SECRET: &str = "credential-demo-alice-sso";

async fn cycle(
    cr: &KeycloakUser,
    api: &Arc<FakeKeycloak>,
    store: &Arc<InMemoryStore>,
) -> DesiredClusterState {
    let state = UserState::read(cr, "demo", api.as_ref(), store.as_ref())
        .await
        .unwrap();
    UserReconciler::new(cr, &state, "demo").reconcile()
}

fn setup() -> (Arc<FakeKeycloak>, Arc<InMemoryStore>) {
    let (api, store) = fakes();
    api.seed_realm("demo");
    for role in ["A", "B", "C"] {
        api.seed_realm_role("demo", role);
    }
    (api, store)
}

fn role_changes(desired: &DesiredClusterState) -> Vec<String> {
    desired
        .iter()
        .filter_map(|a| match a {
            ClusterAction::AssignRole(a) => Some(format!("assign {}", a.role.name)),
            ClusterAction::RemoveRole(a) => Some(format!("remove {}", a.role.name)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_user_created_then_associated() {
    let (api, store) = setup();
    api.seed_group("demo", "staff");
    let mut alice = user("alice");
    alice.realm_roles = vec!["A".to_string()];
    alice.groups = vec!["staff".to_string()];
    let cr = user_cr(alice);

    // Roles and groups need the server-assigned id
    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "CreateUser", "CreateResource"]);
    apply(&desired, &api, &store).await.unwrap();

    let Some(ManagedResource::Secret(secret)) =
        store.get_object(ResourceKind::Secret, NAMESPACE, ALICE_SECRET)
    else {
        panic!("credential secret missing");
    };
    let stored = api.user("demo", "alice").unwrap();
    assert_eq!(stored.password(), secret_string(&secret, "password").as_deref());

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(
        desired.names(),
        [
            "Ping",
            "UpdateUser",
            "AssignRole",
            "AddUserToGroup",
            "UpdateResource"
        ]
    );
    apply(&desired, &api, &store).await.unwrap();

    let id = stored.id.unwrap();
    assert_eq!(api.assigned_role_names("demo", &id, "realm"), ["A"]);
    assert_eq!(api.member_of("demo", &id), ["staff"]);

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "UpdateUser", "UpdateResource"]);
    assert!(!creates_or_deletes(&desired));
}

#[tokio::test]
async fn test_role_mappings_diffed() {
    let (api, store) = setup();
    let mut alice = user("alice");
    alice.realm_roles = vec!["A".to_string(), "B".to_string()];
    let cr = user_cr(alice);
    apply(&cycle(&cr, &api, &store).await, &api, &store)
        .await
        .unwrap();
    api.seed_user_realm_roles("demo", "alice", &["B", "C"]);

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(role_changes(&desired), ["assign A", "remove C"]);
    for action in desired.iter() {
        if let ClusterAction::AssignRole(a) | ClusterAction::RemoveRole(a) = action {
            assert_eq!(a.scope, RoleScope::Realm);
            assert_eq!(a.realm, "demo");
        }
    }
    apply(&desired, &api, &store).await.unwrap();

    let id = api.user("demo", "alice").unwrap().id.unwrap();
    assert_eq!(api.assigned_role_names("demo", &id, "realm"), ["A", "B"]);
    assert!(role_changes(&cycle(&cr, &api, &store).await).is_empty());
}

#[tokio::test]
async fn test_unknown_role_is_skipped() {
    let (api, store) = setup();
    let mut alice = user("alice");
    alice.realm_roles = vec!["A".to_string(), "nonexistent".to_string()];
    let cr = user_cr(alice);
    apply(&cycle(&cr, &api, &store).await, &api, &store)
        .await
        .unwrap();

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(role_changes(&desired), ["assign A"]);
    apply(&desired, &api, &store).await.unwrap();
}

#[tokio::test]
async fn test_group_membership_removed() {
    let (api, store) = setup();
    let staff = api.seed_group("demo", "staff");
    api.seed_group("demo", "admins");
    let mut alice = user("alice");
    alice.groups = vec!["admins".to_string()];
    let cr = user_cr(alice);
    apply(&cycle(&cr, &api, &store).await, &api, &store)
        .await
        .unwrap();
    let id = api.user("demo", "alice").unwrap().id.unwrap();
    api.add_user_to_group("demo", &id, &staff).await.unwrap();

    let desired = cycle(&cr, &api, &store).await;
    let membership: Vec<String> = desired
        .iter()
        .filter_map(|a| match a {
            ClusterAction::AddUserToGroup { group, .. } => Some(format!("+{}", group.name)),
            ClusterAction::RemoveUserFromGroup { group, .. } => Some(format!("-{}", group.name)),
            _ => None,
        })
        .collect();
    assert_eq!(membership, ["+admins", "-staff"]);
    apply(&desired, &api, &store).await.unwrap();
    assert_eq!(api.member_of("demo", &id), ["admins"]);
}

#[tokio::test]
async fn test_password_not_reset_on_update() {
    let (api, store) = setup();
    let cr = user_cr(user("alice"));
    apply(&cycle(&cr, &api, &store).await, &api, &store)
        .await
        .unwrap();

    let desired = cycle(&cr, &api, &store).await;
    let ClusterAction::UpdateUser { user, .. } = &desired.actions()[1] else {
        panic!("expected UpdateUser");
    };
    assert!(user.credentials.is_empty());
    assert!(user.id.is_some());
}

#[tokio::test]
async fn test_deleted_user_is_removed() {
    let (api, store) = setup();
    let cr = user_cr(user("alice"));
    apply(&cycle(&cr, &api, &store).await, &api, &store)
        .await
        .unwrap();

    let cr = deleting(cr);
    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "DeleteUser"]);
    apply(&desired, &api, &store).await.unwrap();
    assert!(api.user("demo", "alice").is_none());
}

#[tokio::test]
async fn test_user_waits_for_its_realm() {
    let (api, store) = fakes();
    let cr = user_cr(user("alice"));

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "CreateUser", "CreateResource"]);
    let err = apply(&desired, &api, &store).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_not_found());
    assert!(!store.contains(ResourceKind::Secret, NAMESPACE, ALICE_SECRET));

    // Once the realm shows up the same resource converges
    api.seed_realm("demo");
    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "CreateUser", "CreateResource"]);
    apply(&desired, &api, &store).await.unwrap();
    assert!(api.user("demo", "alice").is_some());
}
