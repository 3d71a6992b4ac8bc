//! Snapshot of the objects behind one backup.

use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{KeycloakBackup, SecondaryResources};
use crate::resources::backup::backup_pvc_name;
use crate::state::record;
use crate::store::{ResourceStore, get_typed};

#[derive(Clone, Debug, Default)]
pub struct BackupState {
    /// Volume of a local backup.
    pub pvc: Option<PersistentVolumeClaim>,
    /// One-shot backup job, local or to S3.
    pub job: Option<Job>,
    /// Scheduled S3 backup.
    pub cronjob: Option<CronJob>,
    pub secondary_resources: SecondaryResources,
}

impl BackupState {
    pub async fn read(backup: &KeycloakBackup, store: &dyn ResourceStore) -> Result<Self> {
        let ns = backup.namespace().unwrap_or_default();
        let name = backup.name_any();
        let mut state = BackupState::default();

        if backup.spec.aws.is_none() {
            state.pvc = get_typed(store, &ns, &backup_pvc_name(backup)).await?;
            state.job = get_typed(store, &ns, &name).await?;
        } else if backup.spec.is_scheduled() {
            state.cronjob = get_typed(store, &ns, &name).await?;
        } else {
            state.job = get_typed(store, &ns, &name).await?;
        }

        record(&mut state.secondary_resources, "PersistentVolumeClaim", state.pvc.as_ref());
        record(&mut state.secondary_resources, "Job", state.job.as_ref());
        record(&mut state.secondary_resources, "CronJob", state.cronjob.as_ref());
        Ok(state)
    }
}
