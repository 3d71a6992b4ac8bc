//! Client cycles: creation, secret mirroring, roles, default scopes and
//! service account roles.

use std::sync::Arc;

use keycloak_operator::action::{ClusterAction, DesiredClusterState};
use keycloak_operator::crd::{KeycloakClient, KeycloakClientSpec};
use keycloak_operator::keycloak::types::{Client, Role};
use keycloak_operator::reconcile::ClientReconciler;
use keycloak_operator::resources::secrets::secret_string;
use keycloak_operator::state::ClientState;
use keycloak_operator::store::{ManagedResource, ResourceKind};

use crate::common::fakes::{FakeKeycloak, InMemoryStore};
use crate::common::fixtures::{NAMESPACE, client_cr, confidential_client, deleting};
use crate::{apply, creates_or_deletes, fakes};

async fn cycle(
    cr: &KeycloakClient,
    api: &Arc<FakeKeycloak>,
    store: &Arc<InMemoryStore>,
) -> DesiredClusterState {
    let state = ClientState::read(cr, "demo", api.as_ref(), store.as_ref())
        .await
        .unwrap();
    ClientReconciler::new(cr, &state, "demo").reconcile()
}

async fn converge(cr: &KeycloakClient, api: &Arc<FakeKeycloak>, store: &Arc<InMemoryStore>) {
    for _ in 0..2 {
        apply(&cycle(cr, api, store).await, api, store).await.unwrap();
    }
}

fn spec(client: Client) -> KeycloakClientSpec {
    KeycloakClientSpec {
        client,
        ..Default::default()
    }
}

fn setup() -> (Arc<FakeKeycloak>, Arc<InMemoryStore>) {
    let (api, store) = fakes();
    api.seed_realm("demo");
    (api, store)
}

#[tokio::test]
async fn test_confidential_client_secret_mirrored() {
    let (api, store) = setup();
    let cr = client_cr(spec(confidential_client("web")));

    // The secret only exists once Keycloak generated it
    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "CreateClient"]);
    apply(&desired, &api, &store).await.unwrap();

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "UpdateClient", "CreateResource"]);
    let ClusterAction::UpdateClient { client, .. } = &desired.actions()[1] else {
        panic!("expected UpdateClient");
    };
    let created = api.client("demo", "web").unwrap();
    assert_eq!(client.id, created.id);
    apply(&desired, &api, &store).await.unwrap();

    let Some(ManagedResource::Secret(secret)) =
        store.get_object(ResourceKind::Secret, NAMESPACE, "keycloak-client-secret-web")
    else {
        panic!("client secret not mirrored");
    };
    assert_eq!(secret_string(&secret, "CLIENT_ID").as_deref(), Some("web"));
    assert_eq!(secret_string(&secret, "CLIENT_SECRET"), created.secret);

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "UpdateClient", "UpdateResource"]);
    apply(&desired, &api, &store).await.unwrap();
}

#[tokio::test]
async fn test_public_client_has_no_secret() {
    let (api, store) = setup();
    let mut client = confidential_client("spa");
    client.public_client = Some(true);
    let cr = client_cr(spec(client));

    converge(&cr, &api, &store).await;

    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "UpdateClient"]);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_client_roles_follow_spec() {
    let (api, store) = setup();
    let mut cr = client_cr(KeycloakClientSpec {
        roles: vec![
            Role {
                name: "reader".to_string(),
                description: Some("Read access".to_string()),
                ..Default::default()
            },
            Role::named("writer"),
        ],
        ..spec(confidential_client("web"))
    });
    converge(&cr, &api, &store).await;

    let desired = cycle(&cr, &api, &store).await;
    assert!(!creates_or_deletes(&desired));

    // Change one role and drop the other
    cr.spec.roles = vec![Role {
        name: "reader".to_string(),
        description: Some("Read-only access".to_string()),
        ..Default::default()
    }];
    let desired = cycle(&cr, &api, &store).await;
    let role_actions: Vec<String> = desired
        .iter()
        .filter_map(|a| match a {
            ClusterAction::UpdateClientRole { role, .. } => Some(format!("update {}", role.name)),
            ClusterAction::DeleteClientRole { name, .. } => Some(format!("delete {}", name)),
            ClusterAction::CreateClientRole { role, .. } => Some(format!("create {}", role.name)),
            _ => None,
        })
        .collect();
    assert_eq!(role_actions, ["update reader", "delete writer"]);
    apply(&desired, &api, &store).await.unwrap();

    let desired = cycle(&cr, &api, &store).await;
    assert!(!desired.iter().any(|a| a.name().contains("ClientRole")));
}

#[tokio::test]
async fn test_default_scopes_diffed() {
    let (api, store) = setup();
    for scope in ["email", "profile", "roles"] {
        api.seed_client_scope("demo", scope);
    }
    let mut client = confidential_client("web");
    client.default_client_scopes = vec!["email".to_string(), "profile".to_string()];
    let mut cr = client_cr(spec(client));
    converge(&cr, &api, &store).await;

    cr.spec.client.default_client_scopes = vec!["profile".to_string(), "roles".to_string()];
    let desired = cycle(&cr, &api, &store).await;
    let scopes: Vec<String> = desired
        .iter()
        .filter_map(|a| match a {
            ClusterAction::AddDefaultClientScope { scope, .. } => Some(format!("+{}", scope.name)),
            ClusterAction::RemoveDefaultClientScope { scope, .. } => {
                Some(format!("-{}", scope.name))
            }
            _ => None,
        })
        .collect();
    assert_eq!(scopes, ["+roles", "-email"]);
}

#[tokio::test]
async fn test_service_account_realm_roles_assigned() {
    let (api, store) = setup();
    api.seed_realm_role("demo", "offline_access");
    let mut client = confidential_client("worker");
    client.service_accounts_enabled = Some(true);
    let cr = client_cr(KeycloakClientSpec {
        service_account_realm_roles: vec!["offline_access".to_string()],
        ..spec(client)
    });

    apply(&cycle(&cr, &api, &store).await, &api, &store)
        .await
        .unwrap();
    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(
        desired.names(),
        ["Ping", "UpdateClient", "AssignRole", "CreateResource"]
    );
    apply(&desired, &api, &store).await.unwrap();

    let account = api.user("demo", "service-account-worker").unwrap();
    assert_eq!(
        api.assigned_role_names("demo", account.id.as_deref().unwrap(), "realm"),
        ["offline_access"]
    );
    let desired = cycle(&cr, &api, &store).await;
    assert!(!desired.iter().any(|a| a.name() == "AssignRole"));
}

#[tokio::test]
async fn test_deleted_client_is_removed() {
    let (api, store) = setup();
    let cr = client_cr(spec(confidential_client("web")));
    converge(&cr, &api, &store).await;

    let cr = deleting(cr);
    let desired = cycle(&cr, &api, &store).await;
    assert_eq!(desired.names(), ["Ping", "DeleteClient"]);
    apply(&desired, &api, &store).await.unwrap();
    assert!(api.client("demo", "web").is_none());
}
