//! Backup generation.
//!
//! A local backup dumps the database into a dedicated PVC with a one-shot
//! Job. An AWS backup runs the backup container against S3, either once or
//! on a schedule with a CronJob.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, SecretKeySelector, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::config::image_tag;
use crate::crd::{AwsBackupSpec, Keycloak, KeycloakBackup, KeycloakBackupSpec, LabelSelectorSpec};
use crate::resources::common::{
    DATABASE_SECRET_NAME, POSTGRESQL_NAME, managed_labels, owner_reference,
};

const BACKUP_VOLUME_SIZE: &str = "1Gi";
const BACKUP_MOUNT_PATH: &str = "/backup";
const BACKUP_CONTAINER_NAME: &str = "keycloak-backup";

/// Name of the PVC holding a local backup.
pub fn backup_pvc_name(backup: &KeycloakBackup) -> String {
    format!("keycloak-backup-{}", backup.name_any())
}

fn backup_meta(backup: &KeycloakBackup, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: backup.namespace(),
        labels: Some(managed_labels()),
        owner_references: Some(vec![owner_reference(backup)]),
        ..Default::default()
    }
}

fn database_env(name: &str, key: &str) -> EnvVar {
    secret_env(name, DATABASE_SECRET_NAME, key)
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the PVC a local backup writes to.
pub fn generate_backup_pvc(backup: &KeycloakBackup) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: backup_meta(backup, backup_pvc_name(backup)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: backup.spec.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(BACKUP_VOLUME_SIZE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the one-shot Job dumping the database to the backup PVC.
pub fn generate_local_backup_job(backup: &KeycloakBackup, postgresql_image: &str) -> Job {
    let namespace = backup.namespace().unwrap_or_default();
    let pvc_name = backup_pvc_name(backup);
    let command = format!(
        "pg_dump -h {}.{}.svc -U $POSTGRES_USERNAME $POSTGRES_DATABASE > {}/keycloak-$(date +%Y%m%d%H%M%S).sql",
        POSTGRESQL_NAME, namespace, BACKUP_MOUNT_PATH
    );

    Job {
        metadata: backup_meta(backup, backup.name_any()),
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(managed_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: BACKUP_CONTAINER_NAME.to_string(),
                        image: Some(postgresql_image.to_string()),
                        command: Some(vec![
                            "/bin/sh".to_string(),
                            "-c".to_string(),
                            command,
                        ]),
                        env: Some(vec![
                            database_env("POSTGRES_USERNAME", "POSTGRES_USERNAME"),
                            database_env("PGPASSWORD", "POSTGRES_PASSWORD"),
                            database_env("POSTGRES_DATABASE", "POSTGRES_DATABASE"),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: pvc_name.clone(),
                            mount_path: BACKUP_MOUNT_PATH.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: pvc_name.clone(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: pvc_name,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn aws_pod_template(backup: &KeycloakBackup, aws: &AwsBackupSpec, image: &str) -> PodTemplateSpec {
    let namespace = backup.namespace().unwrap_or_default();
    let mut env = vec![
        secret_env("AWS_S3_BUCKET_NAME", &aws.credentials_secret_name, "AWS_S3_BUCKET_NAME"),
        secret_env("AWS_ACCESS_KEY_ID", &aws.credentials_secret_name, "AWS_ACCESS_KEY_ID"),
        secret_env(
            "AWS_SECRET_ACCESS_KEY",
            &aws.credentials_secret_name,
            "AWS_SECRET_ACCESS_KEY",
        ),
        EnvVar {
            name: "COMPONENT_SECRET_NAME".to_string(),
            value: Some(DATABASE_SECRET_NAME.to_string()),
            ..Default::default()
        },
    ];
    let mut args = vec![
        "/opt/intly/tools/entrypoint.sh".to_string(),
        "-c".to_string(),
        "postgres".to_string(),
        "-n".to_string(),
        namespace,
        "-b".to_string(),
        "s3".to_string(),
    ];
    if let Some(key_secret) = &aws.encryption_key_secret_name {
        env.push(EnvVar {
            name: "ENCRYPTION_SECRET_NAME".to_string(),
            value: Some(key_secret.clone()),
            ..Default::default()
        });
        args.extend(["-e".to_string(), "gpg".to_string()]);
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(managed_labels()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: BACKUP_CONTAINER_NAME.to_string(),
                image: Some(image.to_string()),
                command: Some(args),
                env: Some(env),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

/// Generate the one-shot Job uploading a backup to S3.
pub fn generate_aws_backup_job(backup: &KeycloakBackup, aws: &AwsBackupSpec, image: &str) -> Job {
    Job {
        metadata: backup_meta(backup, backup.name_any()),
        spec: Some(JobSpec {
            template: aws_pod_template(backup, aws, image),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the CronJob uploading backups to S3 on the configured schedule.
pub fn generate_aws_backup_cronjob(
    backup: &KeycloakBackup,
    aws: &AwsBackupSpec,
    image: &str,
) -> CronJob {
    CronJob {
        metadata: backup_meta(backup, backup.name_any()),
        spec: CronJobSpec {
            schedule: aws.schedule.clone().unwrap_or_default(),
            job_template: JobTemplateSpec {
                spec: Some(JobSpec {
                    template: aws_pod_template(backup, aws, image),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Name of the backup taken before migrating away from `image`.
///
/// Derived from the old image tag so one migration produces exactly one
/// backup, however many cycles it takes.
pub fn migration_backup_name(keycloak: &Keycloak, image: &str) -> String {
    let tag: String = image_tag(image)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!(
        "{}-migration-{}",
        keycloak.name_any(),
        tag.trim_matches('-')
    )
}

/// Generate the backup taken before migrating a server away from `image`.
pub fn generate_migration_backup(keycloak: &Keycloak, image: &str) -> KeycloakBackup {
    let mut backup = KeycloakBackup::new(
        &migration_backup_name(keycloak, image),
        KeycloakBackupSpec {
            instance_selector: LabelSelectorSpec {
                match_labels: keycloak.labels().clone(),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    backup.metadata.namespace = keycloak.namespace();
    backup.metadata.labels = Some(managed_labels());
    backup.metadata.owner_references = Some(vec![owner_reference(keycloak)]);
    backup
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::KeycloakSpec;

    fn backup(aws: Option<AwsBackupSpec>) -> KeycloakBackup {
        let mut backup = KeycloakBackup::new(
            "nightly",
            KeycloakBackupSpec {
                aws,
                ..Default::default()
            },
        );
        backup.metadata.namespace = Some("sso".to_string());
        backup
    }

    fn aws(schedule: Option<&str>, key: Option<&str>) -> AwsBackupSpec {
        AwsBackupSpec {
            credentials_secret_name: "s3-creds".to_string(),
            encryption_key_secret_name: key.map(str::to_string),
            schedule: schedule.map(str::to_string),
        }
    }

    #[test]
    fn test_local_backup_job_mounts_pvc() {
        let backup = backup(None);
        let pvc = generate_backup_pvc(&backup);
        assert_eq!(pvc.metadata.name.as_deref(), Some("keycloak-backup-nightly"));

        let job = generate_local_backup_job(&backup, "postgres:10");
        assert_eq!(job.metadata.name.as_deref(), Some("nightly"));
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert!(pod.containers[0].command.as_ref().unwrap()[2].contains("keycloak-postgresql.sso.svc"));
        assert_eq!(
            pod.volumes.unwrap()[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "keycloak-backup-nightly"
        );
    }

    #[test]
    fn test_aws_cronjob_uses_schedule() {
        let spec = aws(Some("0 2 * * *"), None);
        let cronjob = generate_aws_backup_cronjob(&backup(Some(spec.clone())), &spec, "backup:1");
        assert_eq!(cronjob.spec.schedule, "0 2 * * *");
    }

    #[test]
    fn test_aws_encryption_flag() {
        let spec = aws(None, Some("gpg-key"));
        let job = generate_aws_backup_job(&backup(Some(spec.clone())), &spec, "backup:1");
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let args = container.command.as_ref().unwrap();
        assert!(args.contains(&"gpg".to_string()));
    }

    #[test]
    fn test_migration_backup_name() {
        let mut kc = Keycloak::new("example", KeycloakSpec::default());
        kc.metadata.namespace = Some("sso".to_string());
        assert_eq!(
            migration_backup_name(&kc, "quay.io/keycloak/keycloak:9.0.2"),
            "example-migration-9-0-2"
        );

        let backup = generate_migration_backup(&kc, "registry/sso74:7.4");
        assert_eq!(backup.metadata.name.as_deref(), Some("example-migration-7-4"));
        assert_eq!(backup.metadata.namespace.as_deref(), Some("sso"));
    }
}
