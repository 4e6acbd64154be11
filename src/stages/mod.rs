use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::backend::{BuildEngine, ContainerRuntime, RegistryClient};
use crate::credentials::{CredentialStore, EnvCredentialStore};
use crate::definition::{PipelineDefinition, StageSpec};
use crate::docker::DockerCli;
use crate::pipeline::{PipelineExecutor, Stage, StageKind};

mod build_stage;
mod publish_stage;
mod test_stage;

pub use build_stage::{BuildStage, DEFAULT_DOCKERFILE};
pub use publish_stage::PublishStage;
pub use test_stage::TestStage;

/// External tools the stages delegate to.
#[derive(Clone)]
pub struct Backends {
    pub engine: Arc<dyn BuildEngine>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub registry: Arc<dyn RegistryClient>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl Backends {
    /// Container CLI for every external step, credentials from the environment.
    pub fn docker(cli: DockerCli) -> Self {
        let cli = Arc::new(cli);
        Self {
            engine: cli.clone(),
            runtime: cli.clone(),
            registry: cli,
            credentials: Arc::new(EnvCredentialStore),
        }
    }
}

pub fn known_stages() -> Vec<&'static str> {
    StageKind::ALL
        .iter()
        .map(|kind| kind.as_str())
        .collect()
}

pub fn create_stage(spec: &StageSpec, base_dir: &Path, backends: &Backends) -> Box<dyn Stage> {
    let name = spec.name();
    match spec {
        StageSpec::Build(build) => Box::new(BuildStage::from_spec(
            name,
            build,
            base_dir,
            backends.engine.clone(),
        )),
        StageSpec::Test(test) => Box::new(TestStage::from_spec(name, test, backends.runtime.clone())),
        StageSpec::Publish(publish) => Box::new(PublishStage::from_spec(
            name,
            publish,
            backends.registry.clone(),
            backends.credentials.clone(),
        )),
    }
}

pub fn build_pipeline(
    definition: &PipelineDefinition,
    base_dir: &Path,
    backends: &Backends,
) -> Result<PipelineExecutor> {
    let stages = definition
        .pipeline
        .iter()
        .map(|spec| create_stage(spec, base_dir, backends))
        .collect();
    PipelineExecutor::new(stages)
}
