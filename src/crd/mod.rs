//! Custom Resource Definitions (CRDs) for keycloak-operator.
//!
//! - `Keycloak`: a Keycloak server and everything it needs to run
//! - `KeycloakRealm`: a realm on one or more servers
//! - `KeycloakClient`, `KeycloakUser`, `KeycloakGroup`: realm contents
//! - `KeycloakBackup`: database backups to a local volume or S3

mod backup;
mod client;
mod common;
mod group;
mod keycloak;
mod realm;
mod user;

pub use backup::*;
pub use client::*;
pub use common::*;
pub use group::*;
pub use keycloak::*;
pub use realm::*;
pub use user::*;
