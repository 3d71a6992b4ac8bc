//! Resource generation module.
//!
//! Plain data templates for the Kubernetes objects the operator owns.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Secrets | Admin, database, realm user and client credentials |
//! | StatefulSet | Keycloak server pods |
//! | Services | HTTPS endpoint and headless discovery |
//! | PostgreSQL | PVC, Deployment and Service, or Service + Endpoints for an external database |
//! | Route / Ingress | External access |
//! | PodDisruptionBudget | At most one server pod down during disruptions |
//! | Monitoring | ServiceMonitor, PrometheusRule, GrafanaDashboard |
//! | Backups | Backup PVC, Job and CronJob, migration KeycloakBackup |

pub mod backup;
pub mod common;
pub mod external_access;
pub mod monitoring;
pub mod pdb;
pub mod postgresql;
pub mod secrets;
pub mod services;
pub mod statefulset;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels};
