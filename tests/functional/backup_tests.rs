//! Backup cycles: local volume dumps and S3 uploads.

use std::sync::Arc;

use keycloak_operator::action::DesiredClusterState;
use keycloak_operator::config::Images;
use keycloak_operator::crd::{AwsBackupSpec, KeycloakBackup, KeycloakBackupSpec};
use keycloak_operator::reconcile::BackupReconciler;
use keycloak_operator::state::BackupState;
use keycloak_operator::store::{ManagedResource, ResourceKind};

use crate::common::fakes::InMemoryStore;
use crate::common::fixtures::{NAMESPACE, backup_cr};
use crate::{apply_to_store, created_resources, written};

async fn cycle(backup: &KeycloakBackup, store: &Arc<InMemoryStore>) -> DesiredClusterState {
    let state = BackupState::read(backup, store.as_ref()).await.unwrap();
    BackupReconciler::new(&Images::default()).reconcile(backup, &state)
}

fn aws(schedule: Option<&str>) -> AwsBackupSpec {
    AwsBackupSpec {
        credentials_secret_name: "s3-credentials".to_string(),
        encryption_key_secret_name: None,
        schedule: schedule.map(str::to_string),
    }
}

#[tokio::test]
async fn test_local_backup_runs_once() {
    let store = Arc::new(InMemoryStore::new());
    let backup = backup_cr("nightly", KeycloakBackupSpec::default());

    let desired = cycle(&backup, &store).await;
    assert_eq!(
        written(&desired),
        ["PersistentVolumeClaim keycloak-backup-nightly", "Job nightly"]
    );
    assert_eq!(created_resources(&desired).len(), 2);
    apply_to_store(&desired, &store).await.unwrap();

    // The Job is the record that the dump ran and is never rewritten
    let desired = cycle(&backup, &store).await;
    assert_eq!(desired.names(), ["UpdateResource"]);
    assert_eq!(written(&desired), ["PersistentVolumeClaim keycloak-backup-nightly"]);
    apply_to_store(&desired, &store).await.unwrap();
}

#[tokio::test]
async fn test_one_shot_s3_backup() {
    let store = Arc::new(InMemoryStore::new());
    let backup = backup_cr(
        "upload",
        KeycloakBackupSpec {
            aws: Some(aws(None)),
            ..Default::default()
        },
    );

    let desired = cycle(&backup, &store).await;
    assert_eq!(written(&desired), ["Job upload"]);
    apply_to_store(&desired, &store).await.unwrap();

    assert!(cycle(&backup, &store).await.is_empty());
    assert!(!store.contains(ResourceKind::PersistentVolumeClaim, NAMESPACE, "keycloak-backup-upload"));
}

#[tokio::test]
async fn test_scheduled_s3_backup_follows_schedule() {
    let store = Arc::new(InMemoryStore::new());
    let mut backup = backup_cr(
        "hourly",
        KeycloakBackupSpec {
            aws: Some(aws(Some("0 * * * *"))),
            ..Default::default()
        },
    );

    let desired = cycle(&backup, &store).await;
    assert_eq!(written(&desired), ["CronJob hourly"]);
    apply_to_store(&desired, &store).await.unwrap();

    backup.spec.aws = Some(aws(Some("30 2 * * *")));
    let desired = cycle(&backup, &store).await;
    assert_eq!(desired.names(), ["UpdateResource"]);
    apply_to_store(&desired, &store).await.unwrap();

    let Some(ManagedResource::CronJob(cronjob)) =
        store.get_object(ResourceKind::CronJob, NAMESPACE, "hourly")
    else {
        panic!("cronjob missing");
    };
    assert_eq!(cronjob.spec.schedule, "30 2 * * *");
}
