//! Backup reconciler.
//!
//! Jobs are created once and never updated: their pod template is
//! immutable and a finished Job is the record that the backup ran.

use crate::action::DesiredClusterState;
use crate::config::Images;
use crate::crd::KeycloakBackup;
use crate::reconcile::{carry_version, create_if_absent, create_or_update};
use crate::resources::backup::{
    generate_aws_backup_cronjob, generate_aws_backup_job, generate_backup_pvc,
    generate_local_backup_job,
};
use crate::resources::postgresql::merge_pvc;
use crate::state::BackupState;

pub struct BackupReconciler<'a> {
    images: &'a Images,
}

impl<'a> BackupReconciler<'a> {
    pub fn new(images: &'a Images) -> Self {
        Self { images }
    }

    pub fn reconcile(&self, backup: &KeycloakBackup, state: &BackupState) -> DesiredClusterState {
        let mut desired = DesiredClusterState::new();
        match &backup.spec.aws {
            None => {
                desired.push(create_or_update(
                    state.pvc.as_ref(),
                    generate_backup_pvc(backup),
                    merge_pvc,
                ));
                desired.add(create_if_absent(
                    state.job.as_ref(),
                    generate_local_backup_job(backup, &self.images.postgresql),
                ));
            }
            Some(aws) if backup.spec.is_scheduled() => {
                desired.push(create_or_update(
                    state.cronjob.as_ref(),
                    generate_aws_backup_cronjob(backup, aws, &self.images.backup),
                    carry_version,
                ));
            }
            Some(aws) => {
                desired.add(create_if_absent(
                    state.job.as_ref(),
                    generate_aws_backup_job(backup, aws, &self.images.backup),
                ));
            }
        }
        desired
    }
}
