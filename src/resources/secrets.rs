//! Secret generation.
//!
//! Generated credentials are only produced for new secrets. Reconcilers keep
//! the data of an observed secret so passwords are never rotated behind the
//! server's back.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::Keycloak;
use crate::keycloak::auth::admin_secret_name;
use crate::keycloak::types::User;
use crate::resources::common::{
    APPLICATION_NAME, DATABASE_SECRET_NAME, POSTGRESQL_DATABASE, POSTGRESQL_NAME, POSTGRESQL_PORT,
    generate_password, keycloak_meta, managed_labels, owner_reference,
};

/// User name of the generated server administrator.
pub const ADMIN_USERNAME: &str = "admin";
/// User name the server uses to connect to PostgreSQL.
pub const DATABASE_USERNAME: &str = "keycloak";

/// Key in the database secret holding the address of an external database.
pub const DATABASE_EXTERNAL_ADDRESS_KEY: &str = "POSTGRES_EXTERNAL_ADDRESS";
/// Key in the database secret holding the port of an external database.
pub const DATABASE_EXTERNAL_PORT_KEY: &str = "POSTGRES_EXTERNAL_PORT";

fn data(pairs: &[(&str, String)]) -> BTreeMap<String, ByteString> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect()
}

/// Value of a secret key as UTF-8, if present and non-empty.
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .filter(|v| !v.is_empty())
}

/// Generate the admin credential secret for a Keycloak server.
pub fn generate_admin_secret(keycloak: &Keycloak) -> Secret {
    Secret {
        metadata: keycloak_meta(keycloak, &admin_secret_name(&keycloak.name_any()), APPLICATION_NAME),
        data: Some(data(&[
            ("ADMIN_USERNAME", ADMIN_USERNAME.to_string()),
            ("ADMIN_PASSWORD", generate_password()),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Generate the database credential secret for a Keycloak server.
pub fn generate_database_secret(keycloak: &Keycloak) -> Secret {
    Secret {
        metadata: keycloak_meta(keycloak, DATABASE_SECRET_NAME, POSTGRESQL_NAME),
        data: Some(data(&[
            ("POSTGRES_DATABASE", POSTGRESQL_DATABASE.to_string()),
            ("POSTGRES_HOST", POSTGRESQL_NAME.to_string()),
            ("POSTGRES_PORT", POSTGRESQL_PORT.to_string()),
            ("POSTGRES_USERNAME", DATABASE_USERNAME.to_string()),
            ("POSTGRES_PASSWORD", generate_password()),
            ("POSTGRES_SUPERUSER", "true".to_string()),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Keep the observed data of a credential secret, refreshing only metadata.
pub fn merge_secret(observed: &Secret, mut desired: Secret) -> Secret {
    if observed.data.is_some() {
        desired.data = observed.data.clone();
    }
    desired.metadata.resource_version = observed.metadata.resource_version.clone();
    desired
}

/// Name of the credential secret for a user of a realm.
///
/// Includes the namespace so users of equally named realms on different
/// servers do not collide when they share a namespace with the operator.
pub fn user_secret_name(realm: &str, username: &str, namespace: &str) -> String {
    format!("credential-{}-{}-{}", realm, username, namespace)
}

/// Generate the credential secret for a realm user, owned by `owner`.
///
/// The password comes from the user's `password` credential when one is set.
pub fn generate_user_secret<K>(owner: &K, realm: &str, user: &User) -> Secret
where
    K: Resource<DynamicType = ()>,
{
    let namespace = owner.namespace().unwrap_or_default();
    let password = user
        .password()
        .map(str::to_string)
        .unwrap_or_else(generate_password);

    Secret {
        metadata: ObjectMeta {
            name: Some(user_secret_name(realm, &user.username, &namespace)),
            namespace: Some(namespace),
            labels: Some(managed_labels()),
            owner_references: Some(vec![owner_reference(owner)]),
            ..Default::default()
        },
        data: Some(data(&[
            ("username", user.username.clone()),
            ("password", password),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Name of the secret mirroring a client's secret.
pub fn client_secret_name(client_id: &str) -> String {
    format!("keycloak-client-secret-{}", client_id)
}

/// Generate the secret mirroring a confidential client's credentials.
pub fn generate_client_secret<K>(owner: &K, client_id: &str, client_secret: &str) -> Secret
where
    K: Resource<DynamicType = ()>,
{
    Secret {
        metadata: ObjectMeta {
            name: Some(client_secret_name(client_id)),
            namespace: owner.namespace(),
            labels: Some(managed_labels()),
            owner_references: Some(vec![owner_reference(owner)]),
            ..Default::default()
        },
        data: Some(data(&[
            ("CLIENT_ID", client_id.to_string()),
            ("CLIENT_SECRET", client_secret.to_string()),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
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
    use crate::crd::{KeycloakRealm, KeycloakRealmSpec, KeycloakSpec};
    use crate::keycloak::AdminCredentials;
    use crate::keycloak::types::Credential;

    fn keycloak() -> Keycloak {
        let mut kc = Keycloak::new("example", KeycloakSpec::default());
        kc.metadata.namespace = Some("sso".to_string());
        kc
    }

    #[test]
    fn test_admin_secret_is_usable_for_login() {
        let secret = generate_admin_secret(&keycloak());
        assert_eq!(secret.metadata.name.as_deref(), Some("credential-example"));
        let creds = AdminCredentials::from_secret_data(secret.data.as_ref().unwrap()).unwrap();
        assert!(matches!(creds, AdminCredentials::Password { ref username, .. } if username == "admin"));
    }

    #[test]
    fn test_merge_secret_keeps_observed_password() {
        let mut observed = generate_database_secret(&keycloak());
        observed.metadata.resource_version = Some("12".to_string());
        let merged = merge_secret(&observed, generate_database_secret(&keycloak()));

        assert_eq!(merged.metadata.resource_version.as_deref(), Some("12"));
        assert_eq!(
            secret_string(&merged, "POSTGRES_PASSWORD"),
            secret_string(&observed, "POSTGRES_PASSWORD")
        );
    }

    #[test]
    fn test_user_secret_uses_declared_password() {
        let mut realm = KeycloakRealm::new("demo", KeycloakRealmSpec::default());
        realm.metadata.namespace = Some("sso".to_string());
        let user = User {
            username: "alice".to_string(),
            credentials: vec![Credential {
                credential_type: Some("password".to_string()),
                value: Some("s3cret".to_string()),
                temporary: None,
            }],
            ..Default::default()
        };

        let secret = generate_user_secret(&realm, "demo", &user);
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("credential-demo-alice-sso")
        );
        assert_eq!(secret_string(&secret, "password").as_deref(), Some("s3cret"));
        assert_eq!(
            secret.metadata.owner_references.unwrap()[0].kind,
            "KeycloakRealm"
        );
    }

    #[test]
    fn test_client_secret_name() {
        assert_eq!(client_secret_name("web"), "keycloak-client-secret-web");
    }
}
