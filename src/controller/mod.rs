//! Controllers for keycloak-operator.
//!
//! Each custom resource kind has a controller that hosts the read,
//! reconcile and run cycle for it:
//! - Keycloak servers (`keycloak_controller`)
//! - realms, clients, users, groups and backups, which share the loop in
//!   `resource_controller`

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod status;

pub mod keycloak_controller;
pub mod resource_controller;

// ManagedCustomResource implementations
mod backup_controller;
mod client_controller;
mod group_controller;
mod realm_controller;
mod user_controller;
