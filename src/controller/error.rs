//! The operator's single error type.
//!
//! Every failure is classified as retryable or not; that decides how soon
//! the controller looks at the object again.

use std::time::Duration;

use kube::runtime::controller::Action;
use thiserror::Error;

/// Delay before retrying an error that will not go away on its own.
pub const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Keycloak admin API returned a non-success status
    #[error("Keycloak API error ({status}): {message}")]
    KeycloakApi { status: u16, message: String },

    /// Transport failure talking to the Keycloak admin API
    #[error("Keycloak HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The resource kind is not served by this cluster
    #[error("Resource kind not available in this cluster: {0}")]
    KindUnknown(String),

    /// A field the operator needs is unset
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The spec asks for something impossible
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operator cannot act with the configuration it was given
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Expected to clear up without anyone touching the spec
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Permanent error: {0}")]
    Permanent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// A Kubernetes object is gone. Admin API 404s are not included: the
    /// entity may still appear (a realm created by another resource) or the
    /// next cycle re-reads and stops referring to it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Whether retrying soon can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(e)) => e.code >= 500 || e.code == 429,
            Error::Kube(e) => matches!(e, kube::Error::Service(_)),
            // 401 covers expired tokens; the next cycle logs in again.
            // 404 means the entity went away between Read and RunAll.
            Error::KeycloakApi { status, .. } => {
                *status >= 500 || matches!(*status, 401 | 404 | 429)
            }
            Error::Http(_) | Error::Transient(_) => true,
            Error::KindUnknown(_)
            | Error::Validation(_)
            | Error::Configuration(_)
            | Error::Permanent(_)
            | Error::MissingField(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Delay before the next attempt; `error_delay` for retryable errors.
    pub fn requeue_after(&self, error_delay: Duration) -> Duration {
        if self.is_retryable() {
            error_delay
        } else {
            PERMANENT_ERROR_REQUEUE
        }
    }

    /// What the controller does once a cycle failed with this error.
    ///
    /// Only a vanished Kubernetes object waits for the next watch event;
    /// everything else is looked at again after a delay.
    pub fn next_action(&self, error_delay: Duration) -> Action {
        if self.is_not_found() {
            Action::await_change()
        } else {
            Action::requeue(self.requeue_after(error_delay))
        }
    }

    /// Build an admin API error from a status code and response body.
    pub fn keycloak(status: u16, message: impl Into<String>) -> Self {
        Error::KeycloakApi {
            status,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
