use std::sync::Arc;

use tracing::info;

use crate::artifact::ImageReference;
use crate::backend::RegistryClient;
use crate::credentials::{CredentialStore, RegistrySession};
use crate::definition::PublishSpec;
use crate::error::StageError;
use crate::pipeline::{Stage, StageContext, StageKind, StageOutput};

pub struct PublishStage {
    name: String,
    extra_tags: Vec<String>,
    registry: Arc<dyn RegistryClient>,
    credentials: Arc<dyn CredentialStore>,
}

impl PublishStage {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<dyn RegistryClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            name: name.into(),
            extra_tags: Vec::new(),
            registry,
            credentials,
        }
    }

    pub fn from_spec(
        name: String,
        spec: &PublishSpec,
        registry: Arc<dyn RegistryClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            name,
            extra_tags: spec.tags.clone(),
            registry,
            credentials,
        }
    }

    fn destinations(&self, target: &ImageReference) -> Result<Vec<ImageReference>, StageError> {
        let mut destinations = vec![target.clone()];
        for tag in &self.extra_tags {
            let reference = target.with_tag(tag).map_err(|err| StageError::Publish {
                destination: format!("{}:{tag}", target.repository()),
                message: err.to_string(),
                output: String::new(),
            })?;
            if !destinations.contains(&reference) {
                destinations.push(reference);
            }
        }
        Ok(destinations)
    }
}

impl Stage for PublishStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let target = ctx.image();
        let registry = target.registry_host();
        let artifact = ctx.artifact().ok_or_else(|| StageError::Publish {
            destination: target.to_string(),
            message: "no image artifact to publish".into(),
            output: String::new(),
        })?;
        let handle = ctx
            .credential()
            .ok_or_else(|| StageError::auth(registry, "no credential configured for publishing"))?;
        let destinations = self.destinations(target)?;

        let session = RegistrySession::open(
            self.registry.as_ref(),
            self.credentials.as_ref(),
            handle,
            registry,
        )?;
        let mut log = Vec::with_capacity(destinations.len());
        for destination in &destinations {
            // On error the session is released by its drop guard.
            let pushed = session.push(artifact, destination)?;
            info!(
                destination = %destination,
                digest = artifact.short_digest(),
                "Image published"
            );
            if !pushed.is_empty() {
                log.push(pushed);
            }
        }
        session.close()?;

        Ok(StageOutput {
            log: log.join("\n"),
            artifact: None,
        })
    }
}
