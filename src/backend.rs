use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::artifact::{ImageArtifact, ImageReference};
use crate::credentials::RegistryCredentials;
use crate::error::StageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub reference: ImageReference,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub artifact: ImageArtifact,
    pub log: String,
}

/// Container created from an artifact with the image entry point cleared, so
/// `command` runs in place of the image's default service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image_digest: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait BuildEngine: Send + Sync {
    fn build(&self, request: &BuildRequest) -> Result<BuildOutput, StageError>;
}

pub trait ContainerRuntime: Send + Sync {
    fn create(&self, spec: &ContainerSpec) -> Result<String, StageError>;
    /// Start the container and block until its command exits. A container
    /// that cannot be started is an `Environment` error; the command's own
    /// exit status, whatever its value, is returned in the outcome.
    fn start_and_wait(&self, container_id: &str) -> Result<CommandOutcome, StageError>;
    fn remove(&self, container_id: &str) -> Result<(), StageError>;
}

pub trait RegistryClient: Send + Sync {
    fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<(), StageError>;
    /// Tag the artifact's digest as `destination` and upload it. Returns the push log.
    fn push(
        &self,
        artifact: &ImageArtifact,
        destination: &ImageReference,
    ) -> Result<String, StageError>;
    fn logout(&self, registry: &str) -> Result<(), StageError>;
}

/// Container that is removed when the guard goes out of scope.
pub struct EphemeralContainer<'a> {
    runtime: &'a dyn ContainerRuntime,
    id: String,
}

impl<'a> EphemeralContainer<'a> {
    pub fn create(runtime: &'a dyn ContainerRuntime, spec: &ContainerSpec) -> Result<Self, StageError> {
        let id = runtime.create(spec)?;
        debug!(container = id.as_str(), "Ephemeral container created");
        Ok(Self { runtime, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run(&self) -> Result<CommandOutcome, StageError> {
        self.runtime.start_and_wait(&self.id)
    }
}

impl Drop for EphemeralContainer<'_> {
    fn drop(&mut self) {
        match self.runtime.remove(&self.id) {
            Ok(()) => debug!(container = self.id.as_str(), "Ephemeral container removed"),
            Err(err) => warn!(
                container = self.id.as_str(),
                "Failed to remove ephemeral container: {err}"
            ),
        }
    }
}
