//! Registry credentials.
//!
//! The pipeline only ever carries a [`CredentialHandle`]. The secret behind it
//! is resolved by a [`CredentialStore`] when a [`RegistrySession`] opens and is
//! dropped as soon as the login call returns.

use std::env;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::artifact::{ImageArtifact, ImageReference};
use crate::backend::RegistryClient;
use crate::error::StageError;

pub const CREDENTIAL_ENV_PREFIX: &str = "IMAGECI_CREDENTIAL_";

/// Opaque reference to stored registry credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialHandle(String);

impl CredentialHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CredentialHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Secret value that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub secret: Secret,
}

pub trait CredentialStore: Send + Sync {
    fn resolve(&self, handle: &CredentialHandle, registry: &str)
    -> Result<RegistryCredentials, StageError>;
}

/// Resolves handle `<id>` from `IMAGECI_CREDENTIAL_<ID>_USERNAME` and
/// `IMAGECI_CREDENTIAL_<ID>_PASSWORD`. The id is upper-cased and every
/// character outside `[A-Z0-9]` becomes `_`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn variable_names(handle: &CredentialHandle) -> (String, String) {
        let key: String = handle
            .id()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        (
            format!("{CREDENTIAL_ENV_PREFIX}{key}_USERNAME"),
            format!("{CREDENTIAL_ENV_PREFIX}{key}_PASSWORD"),
        )
    }
}

impl CredentialStore for EnvCredentialStore {
    fn resolve(
        &self,
        handle: &CredentialHandle,
        registry: &str,
    ) -> Result<RegistryCredentials, StageError> {
        let (user_var, pass_var) = Self::variable_names(handle);
        let lookup = |name: &str| {
            env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    StageError::auth(
                        registry,
                        format!("credential '{handle}' is not available ({name} is unset)"),
                    )
                })
        };
        let username = lookup(&user_var)?;
        let secret = Secret::new(lookup(&pass_var)?);
        debug!(credential = %handle, "Credential resolved from environment");
        Ok(RegistryCredentials { username, secret })
    }
}

/// Authenticated registry session. Logged out on [`RegistrySession::close`],
/// or on drop if the session is abandoned.
pub struct RegistrySession<'a> {
    client: &'a dyn RegistryClient,
    registry: String,
    open: bool,
}

impl<'a> RegistrySession<'a> {
    pub fn open(
        client: &'a dyn RegistryClient,
        store: &dyn CredentialStore,
        handle: &CredentialHandle,
        registry: &str,
    ) -> Result<Self, StageError> {
        let credentials = store.resolve(handle, registry)?;
        client.login(registry, &credentials)?;
        drop(credentials);
        info!(registry, credential = %handle, "Registry session opened");
        Ok(Self {
            client,
            registry: registry.to_string(),
            open: true,
        })
    }

    pub fn push(
        &self,
        artifact: &ImageArtifact,
        destination: &ImageReference,
    ) -> Result<String, StageError> {
        self.client.push(artifact, destination)
    }

    /// Logs out. A failed logout is a `Publish` error: the credential was
    /// already accepted by the registry.
    pub fn close(mut self) -> Result<(), StageError> {
        self.open = false;
        let result = self.client.logout(&self.registry);
        if result.is_ok() {
            info!(registry = self.registry.as_str(), "Registry session closed");
        }
        result
    }
}

impl Drop for RegistrySession<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        match self.client.logout(&self.registry) {
            Ok(()) => debug!(registry = self.registry.as_str(), "Registry session released"),
            Err(err) => warn!(
                registry = self.registry.as_str(),
                "Failed to release registry session: {err}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted_in_debug() {
        let creds = RegistryCredentials {
            username: "ci-bot".into(),
            secret: Secret::new("hunter2"),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("ci-bot"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn variable_names_are_normalised() {
        let (user, pass) = EnvCredentialStore::variable_names(&CredentialHandle::new("docker-hub.ci"));
        assert_eq!(user, "IMAGECI_CREDENTIAL_DOCKER_HUB_CI_USERNAME");
        assert_eq!(pass, "IMAGECI_CREDENTIAL_DOCKER_HUB_CI_PASSWORD");
    }

    #[test]
    fn env_store_resolves_both_variables() {
        temp_env::with_vars(
            [
                ("IMAGECI_CREDENTIAL_HUB_USERNAME", Some("bot")),
                ("IMAGECI_CREDENTIAL_HUB_PASSWORD", Some("s3cret")),
            ],
            || {
                let creds = EnvCredentialStore
                    .resolve(&CredentialHandle::new("hub"), "docker.io")
                    .unwrap();
                assert_eq!(creds.username, "bot");
                assert_eq!(creds.secret.expose(), "s3cret");
            },
        );
    }

    #[test]
    fn missing_password_is_an_auth_error() {
        temp_env::with_vars(
            [
                ("IMAGECI_CREDENTIAL_PARTIAL_USERNAME", Some("bot")),
                ("IMAGECI_CREDENTIAL_PARTIAL_PASSWORD", None::<&str>),
            ],
            || {
                let err = EnvCredentialStore
                    .resolve(&CredentialHandle::new("partial"), "ghcr.io")
                    .unwrap_err();
                assert_eq!(err.kind(), crate::error::ErrorKind::AuthError);
                assert!(err.to_string().contains("IMAGECI_CREDENTIAL_PARTIAL_PASSWORD"));
            },
        );
    }
}
