//! Admin login and construction of authenticated clients.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, instrument};
use url::Url;

use super::client::KeycloakClient;
use super::types::TokenResponse;
use crate::controller::error::{Error, Result};
use crate::crd::Keycloak;
use crate::resources::common::{KEYCLOAK_HTTPS_PORT, KEYCLOAK_SERVICE_NAME};
use crate::store::{ResourceStore, get_typed};

/// Client used for password logins against the master realm.
const ADMIN_CLI: &str = "admin-cli";

/// Credentials the operator logs in with.
#[derive(Clone, PartialEq, Eq)]
pub enum AdminCredentials {
    Password { username: String, password: String },
    ClientCredentials { client_id: String, client_secret: String },
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminCredentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            AdminCredentials::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

fn secret_value(data: &BTreeMap<String, ByteString>, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .filter(|v| !v.is_empty())
}

impl AdminCredentials {
    /// Pick the login method from the admin credential secret.
    ///
    /// The secret must carry exactly one of `ADMIN_USERNAME`/`ADMIN_PASSWORD`
    /// or `CLIENT_ID`/`CLIENT_SECRET`.
    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Result<Self> {
        let password = secret_value(data, "ADMIN_USERNAME").zip(secret_value(data, "ADMIN_PASSWORD"));
        let client = secret_value(data, "CLIENT_ID").zip(secret_value(data, "CLIENT_SECRET"));

        match (password, client) {
            (Some((username, password)), None) => Ok(Self::Password { username, password }),
            (None, Some((client_id, client_secret))) => Ok(Self::ClientCredentials {
                client_id,
                client_secret,
            }),
            (Some(_), Some(_)) => Err(Error::Configuration(
                "admin secret holds both user and client credentials".to_string(),
            )),
            (None, None) => Err(Error::Configuration(
                "admin secret holds neither ADMIN_USERNAME/ADMIN_PASSWORD nor CLIENT_ID/CLIENT_SECRET"
                    .to_string(),
            )),
        }
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        match self {
            AdminCredentials::Password { username, password } => vec![
                ("grant_type", "password"),
                ("client_id", ADMIN_CLI),
                ("username", username.as_str()),
                ("password", password.as_str()),
            ],
            AdminCredentials::ClientCredentials {
                client_id,
                client_secret,
            } => vec![
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ],
        }
    }
}

/// Name of the secret holding admin credentials for a Keycloak server.
pub fn admin_secret_name(keycloak_name: &str) -> String {
    format!("credential-{}", keycloak_name)
}

/// Admin URL for a server and whether it is the in-cluster service.
pub fn server_url(keycloak: &Keycloak) -> Result<(Url, bool)> {
    if keycloak.spec.external.enabled {
        let raw = keycloak.spec.external.url.as_deref().ok_or_else(|| {
            Error::MissingField("spec.external.url for an external Keycloak".to_string())
        })?;
        let url = Url::parse(raw)
            .map_err(|e| Error::Validation(format!("spec.external.url {}: {}", raw, e)))?;
        return Ok((url, false));
    }

    let namespace = keycloak.namespace().unwrap_or_default();
    let raw = format!(
        "https://{}.{}.svc:{}",
        KEYCLOAK_SERVICE_NAME, namespace, KEYCLOAK_HTTPS_PORT
    );
    let url = Url::parse(&raw).map_err(|e| Error::Validation(format!("{}: {}", raw, e)))?;
    Ok((url, true))
}

/// Exchange credentials for a bearer token.
#[instrument(skip(http, credentials))]
pub async fn login(http: &reqwest::Client, base_url: &Url, credentials: &AdminCredentials) -> Result<String> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Configuration(format!("invalid Keycloak URL {}", base_url)))?
        .pop_if_empty()
        .extend(["auth", "realms", "master", "protocol", "openid-connect", "token"]);

    let response = http.post(url).form(&credentials.form()).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::keycloak(status.as_u16(), body));
    }

    let token: TokenResponse = response.json().await?;
    debug!(expires_in = ?token.expires_in, "Obtained admin token");
    Ok(token.access_token)
}

/// Builds authenticated [`KeycloakClient`]s for Keycloak servers.
#[derive(Clone)]
pub struct KeycloakClientFactory {
    store: Arc<dyn ResourceStore>,
    timeout: Duration,
}

impl KeycloakClientFactory {
    pub fn new(store: Arc<dyn ResourceStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Load admin credentials for a server from its credential secret.
    pub async fn credentials(&self, keycloak: &Keycloak) -> Result<AdminCredentials> {
        let namespace = keycloak.namespace().unwrap_or_default();
        let name = admin_secret_name(&keycloak.name_any());
        let secret: Secret = get_typed(self.store.as_ref(), &namespace, &name)
            .await?
            .ok_or_else(|| Error::Transient(format!("admin secret {} not created yet", name)))?;
        AdminCredentials::from_secret_data(&secret.data.unwrap_or_default())
    }

    /// Log in to a server and return a client bound to the token.
    pub async fn authenticated_client(&self, keycloak: &Keycloak) -> Result<KeycloakClient> {
        let credentials = self.credentials(keycloak).await?;
        let (base_url, internal) = server_url(keycloak)?;

        // The in-cluster service uses the server's self-signed certificate
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(internal)
            .build()?;

        let token = login(&http, &base_url, &credentials).await?;
        Ok(KeycloakClient::new(http, base_url, token))
    }
}
