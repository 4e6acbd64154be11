use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::backend::{ContainerRuntime, ContainerSpec, EphemeralContainer};
use crate::definition::TestSpec;
use crate::error::StageError;
use crate::pipeline::{Stage, StageContext, StageKind, StageOutput};

pub struct TestStage {
    name: String,
    command: Vec<String>,
    env: BTreeMap<String, String>,
    workdir: Option<String>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl TestStage {
    pub fn new(name: impl Into<String>, command: Vec<String>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name: name.into(),
            command,
            env: BTreeMap::new(),
            workdir: None,
            runtime,
        }
    }

    pub fn from_spec(name: String, spec: &TestSpec, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name,
            command: spec.command.clone(),
            env: spec.env.clone(),
            workdir: spec.workdir.clone(),
            runtime,
        }
    }
}

impl Stage for TestStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Test
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let artifact = ctx
            .artifact()
            .ok_or_else(|| StageError::environment("no image artifact to test"))?;
        if self.command.is_empty() {
            return Err(StageError::environment("test command is empty"));
        }
        let spec = ContainerSpec {
            image_digest: artifact.digest.clone(),
            command: self.command.clone(),
            env: self.env.clone(),
            workdir: self.workdir.clone(),
        };

        let container = EphemeralContainer::create(self.runtime.as_ref(), &spec)?;
        info!(
            container = container.id(),
            digest = artifact.short_digest(),
            command = %self.command.join(" "),
            "Running tests"
        );
        let outcome = container.run()?;
        drop(container);

        if !outcome.success() {
            return Err(StageError::TestFailure {
                code: outcome.exit_code,
                output: outcome.output,
            });
        }
        Ok(StageOutput {
            log: outcome.output,
            artifact: None,
        })
    }
}
