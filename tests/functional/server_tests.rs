//! Server cycles: topology creation, capability gating and migrations.

use std::sync::Arc;

use keycloak_operator::action::{ClusterAction, DesiredClusterState};
use keycloak_operator::capability::{
    CapabilityCache, CapabilityStore, GRAFANA_DASHBOARD, ROUTE, SERVICE_MONITOR,
};
use keycloak_operator::config::Images;
use keycloak_operator::crd::{Keycloak, KeycloakSpec};
use keycloak_operator::migrate::{DefaultMigrator, Migrator};
use keycloak_operator::reconcile::ClusterReconciler;
use keycloak_operator::resources::statefulset::{keycloak_image, replicas};
use keycloak_operator::state::ClusterState;
use keycloak_operator::store::{ManagedResource, ResourceKind};

use crate::common::fakes::InMemoryStore;
use crate::common::fixtures::{NAMESPACE, keycloak, keycloak_with_instances};
use crate::{apply_to_store, created_resources, creates_or_deletes, written};

async fn cycle(
    kc: &Keycloak,
    images: &Images,
    capabilities: &CapabilityCache,
    store: &Arc<InMemoryStore>,
) -> (ClusterState, DesiredClusterState) {
    let state = ClusterState::read(kc, store.as_ref(), capabilities)
        .await
        .unwrap();
    let desired = ClusterReconciler::new(images, capabilities).reconcile(kc, &state);
    (state, desired)
}

fn stored_replicas(store: &InMemoryStore) -> Option<i32> {
    match store.get_object(ResourceKind::StatefulSet, NAMESPACE, "keycloak") {
        Some(ManagedResource::StatefulSet(sts)) => replicas(&sts),
        _ => None,
    }
}

fn upgraded_images() -> Images {
    Images {
        keycloak: "quay.io/keycloak/keycloak:10.0.0".to_string(),
        ..Images::default()
    }
}

#[tokio::test]
async fn test_new_server_topology() {
    let store = Arc::new(InMemoryStore::new());
    let images = Images::default();
    let capabilities = CapabilityCache::new();
    let kc = keycloak_with_instances("example", 2);

    let (_, desired) = cycle(&kc, &images, &capabilities, &store).await;
    assert_eq!(
        written(&desired),
        [
            "Secret credential-example",
            "Secret keycloak-db-secret",
            "PersistentVolumeClaim keycloak-postgresql-claim",
            "Deployment keycloak-postgresql",
            "Service keycloak-postgresql",
            "Service keycloak",
            "Service keycloak-discovery",
            "StatefulSet keycloak",
        ]
    );
    assert_eq!(created_resources(&desired).len(), desired.len());
    apply_to_store(&desired, &store).await.unwrap();
    assert_eq!(stored_replicas(&store), Some(2));

    // Everything exists now and each update carries the stored version
    let (_, desired) = cycle(&kc, &images, &capabilities, &store).await;
    assert!(!creates_or_deletes(&desired));
    assert!(desired.iter().all(|a| a.name() == "UpdateResource"));
    apply_to_store(&desired, &store).await.unwrap();
}

#[tokio::test]
async fn test_generated_passwords_survive_updates() {
    let store = Arc::new(InMemoryStore::new());
    let images = Images::default();
    let capabilities = CapabilityCache::new();
    let kc = keycloak_with_instances("example", 1);

    let (_, desired) = cycle(&kc, &images, &capabilities, &store).await;
    apply_to_store(&desired, &store).await.unwrap();
    let before = store.get_object(ResourceKind::Secret, NAMESPACE, "credential-example");

    let (_, desired) = cycle(&kc, &images, &capabilities, &store).await;
    apply_to_store(&desired, &store).await.unwrap();
    let after = store.get_object(ResourceKind::Secret, NAMESPACE, "credential-example");

    let (Some(ManagedResource::Secret(before)), Some(ManagedResource::Secret(after))) =
        (before, after)
    else {
        panic!("admin secret missing");
    };
    assert_eq!(before.data, after.data);
}

#[tokio::test]
async fn test_optional_kinds_follow_capabilities() {
    let store = Arc::new(InMemoryStore::new());
    let images = Images::default();
    let capabilities = CapabilityCache::new();
    let mut spec = KeycloakSpec::default();
    spec.external_access.enabled = true;
    spec.monitoring.enabled = true;
    let kc = keycloak("example", spec);

    // Nothing discovered yet: plain Ingress, no monitoring objects
    let (_, desired) = cycle(&kc, &images, &capabilities, &store).await;
    let kinds: Vec<ResourceKind> = created_resources(&desired).iter().map(|r| r.kind()).collect();
    assert!(kinds.contains(&ResourceKind::Ingress));
    assert!(!kinds.iter().any(|k| matches!(k, ResourceKind::Custom(_))));

    capabilities.set(ROUTE.key, true);
    capabilities.set(SERVICE_MONITOR.key, true);
    capabilities.set(GRAFANA_DASHBOARD.key, false);
    let (_, desired) = cycle(&kc, &images, &capabilities, &store).await;
    let kinds: Vec<ResourceKind> = created_resources(&desired).iter().map(|r| r.kind()).collect();
    assert!(kinds.contains(&ResourceKind::Custom(ROUTE)));
    assert!(kinds.contains(&ResourceKind::Custom(SERVICE_MONITOR)));
    assert!(!kinds.contains(&ResourceKind::Custom(GRAFANA_DASHBOARD)));
    assert!(!kinds.contains(&ResourceKind::Ingress));

    apply_to_store(&desired, &store).await.unwrap();
    assert!(store.contains(ResourceKind::Custom(ROUTE), NAMESPACE, "keycloak"));

    let (state, desired) = cycle(&kc, &images, &capabilities, &store).await;
    assert!(state.route.is_some());
    assert!(!creates_or_deletes(&desired));
}

#[tokio::test]
async fn test_image_change_migrates_through_one_replica() {
    let store = Arc::new(InMemoryStore::new());
    let capabilities = CapabilityCache::new();
    let kc = keycloak_with_instances("example", 5);

    let old = Images::default();
    let (_, desired) = cycle(&kc, &old, &capabilities, &store).await;
    apply_to_store(&desired, &store).await.unwrap();
    assert_eq!(stored_replicas(&store), Some(5));

    let new = upgraded_images();
    let migrator = DefaultMigrator::new(new.clone());
    let (state, desired) = cycle(&kc, &new, &capabilities, &store).await;
    assert_eq!(state.running_image(), Some(old.keycloak.as_str()));
    let desired = migrator.migrate(&kc, &state, desired).unwrap();

    let server = desired
        .iter()
        .find_map(|a| match a {
            ClusterAction::UpdateResource(ManagedResource::StatefulSet(sts)) => Some(sts),
            _ => None,
        })
        .unwrap();
    assert_eq!(replicas(server), Some(1));
    assert_eq!(keycloak_image(server), Some(new.keycloak.as_str()));
    apply_to_store(&desired, &store).await.unwrap();
    assert_eq!(stored_replicas(&store), Some(1));

    // The new image runs, so the next cycle restores the instance count
    let (state, desired) = cycle(&kc, &new, &capabilities, &store).await;
    let desired = migrator.migrate(&kc, &state, desired).unwrap();
    apply_to_store(&desired, &store).await.unwrap();
    assert_eq!(stored_replicas(&store), Some(5));
}

#[tokio::test]
async fn test_migration_backup_taken_first() {
    let store = Arc::new(InMemoryStore::new());
    let capabilities = CapabilityCache::new();
    let mut spec = KeycloakSpec {
        instances: 3,
        ..Default::default()
    };
    spec.migration.backups.enabled = true;
    let kc = keycloak("example", spec);

    let (_, desired) = cycle(&kc, &Images::default(), &capabilities, &store).await;
    apply_to_store(&desired, &store).await.unwrap();

    let new = upgraded_images();
    let (state, desired) = cycle(&kc, &new, &capabilities, &store).await;
    let desired = DefaultMigrator::new(new.clone())
        .migrate(&kc, &state, desired)
        .unwrap();
    let ClusterAction::CreateResource(backup) = &desired.actions()[0] else {
        panic!("expected the backup first");
    };
    assert_eq!(backup.kind(), ResourceKind::KeycloakBackup);
    let backup_only = DesiredClusterState::from(vec![desired.actions()[0].clone()]);
    apply_to_store(&backup_only, &store).await.unwrap();

    // The old image still runs but the backup is not requested again
    let (state, desired) = cycle(&kc, &new, &capabilities, &store).await;
    assert!(state.migration_backup.is_some());
    let desired = DefaultMigrator::new(new).migrate(&kc, &state, desired).unwrap();
    assert!(
        !desired
            .iter()
            .any(|a| matches!(a, ClusterAction::CreateResource(r) if r.kind() == ResourceKind::KeycloakBackup))
    );
}

#[tokio::test]
async fn test_unmanaged_and_external_servers_get_no_topology() {
    let store = Arc::new(InMemoryStore::new());
    let images = Images::default();
    let capabilities = CapabilityCache::new();

    let unmanaged = keycloak(
        "unmanaged",
        KeycloakSpec {
            unmanaged: true,
            ..Default::default()
        },
    );
    let mut spec = KeycloakSpec::default();
    spec.external.enabled = true;
    spec.external.url = Some("https://sso.example.com".to_string());
    let external = keycloak("external", spec);

    for kc in [unmanaged, external] {
        let (_, desired) = cycle(&kc, &images, &capabilities, &store).await;
        assert!(desired.is_empty());
    }
    assert_eq!(store.len(), 0);
}
