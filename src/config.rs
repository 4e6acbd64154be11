use std::env;

use anyhow::{Context, Result, bail};

use crate::artifact::ImageReference;
use crate::credentials::CredentialHandle;

pub const REGISTRY_TARGET_ENV: &str = "IMAGECI_REGISTRY_TARGET";
pub const CREDENTIAL_ID_ENV: &str = "IMAGECI_CREDENTIAL_ID";

/// Run-level parameters, fixed when the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub registry_target: ImageReference,
    /// Only the publish stage ever sees this.
    pub credential_id: Option<CredentialHandle>,
}

impl RunConfig {
    pub fn new(registry_target: ImageReference, credential_id: Option<CredentialHandle>) -> Self {
        Self {
            registry_target,
            credential_id,
        }
    }

    /// Resolve from explicit values, falling back to the definition's default image.
    pub fn resolve(
        registry_target: Option<&str>,
        credential_id: Option<&str>,
        default_image: Option<&str>,
    ) -> Result<Self> {
        let target = registry_target
            .filter(|value| !value.trim().is_empty())
            .or(default_image)
            .with_context(|| {
                format!("A registry target is required (set {REGISTRY_TARGET_ENV} or --registry-target)")
            })?;
        let registry_target: ImageReference = target
            .parse()
            .with_context(|| format!("Invalid registry target '{target}'"))?;
        let credential_id = match credential_id.map(str::trim) {
            Some("") | None => None,
            Some(id) if id.chars().any(char::is_whitespace) => {
                bail!("Credential id '{id}' cannot contain whitespace")
            }
            Some(id) => Some(CredentialHandle::new(id)),
        };
        Ok(Self::new(registry_target, credential_id))
    }

    pub fn from_env(default_image: Option<&str>) -> Result<Self> {
        let target = env::var(REGISTRY_TARGET_ENV).ok();
        let credential = env::var(CREDENTIAL_ID_ENV).ok();
        Self::resolve(target.as_deref(), credential.as_deref(), default_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_target_wins_over_default_image() {
        let config = RunConfig::resolve(Some("ghcr.io/org/app:2"), None, Some("org/app")).unwrap();
        assert_eq!(config.registry_target.to_string(), "ghcr.io/org/app:2");
        assert!(config.credential_id.is_none());
    }

    #[test]
    fn missing_target_is_an_error() {
        let err = RunConfig::resolve(None, Some("hub"), None).unwrap_err();
        assert!(err.to_string().contains(REGISTRY_TARGET_ENV));
    }

    #[test]
    fn reads_environment() {
        temp_env::with_vars(
            [
                (REGISTRY_TARGET_ENV, Some("synergy/o3skim")),
                (CREDENTIAL_ID_ENV, Some("dockerhub")),
            ],
            || {
                let config = RunConfig::from_env(None).unwrap();
                assert_eq!(config.registry_target.to_string(), "synergy/o3skim:latest");
                assert_eq!(config.credential_id.unwrap().id(), "dockerhub");
            },
        );
    }

    #[test]
    fn blank_credential_is_treated_as_absent() {
        let config = RunConfig::resolve(Some("org/app"), Some("  "), None).unwrap();
        assert!(config.credential_id.is_none());
    }
}
