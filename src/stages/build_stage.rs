use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::backend::{BuildEngine, BuildRequest};
use crate::definition::BuildSpec;
use crate::error::StageError;
use crate::pipeline::{Stage, StageContext, StageKind, StageOutput};

pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

pub struct BuildStage {
    name: String,
    context: PathBuf,
    dockerfile: Option<PathBuf>,
    build_args: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    engine: Arc<dyn BuildEngine>,
}

impl BuildStage {
    pub fn new(name: impl Into<String>, context: impl Into<PathBuf>, engine: Arc<dyn BuildEngine>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            dockerfile: None,
            build_args: BTreeMap::new(),
            labels: BTreeMap::new(),
            engine,
        }
    }

    pub fn from_spec(name: String, spec: &BuildSpec, base_dir: &Path, engine: Arc<dyn BuildEngine>) -> Self {
        Self {
            name,
            context: base_dir.join(&spec.context),
            dockerfile: spec.dockerfile.as_ref().map(|path| base_dir.join(path)),
            build_args: spec.build_args.clone(),
            labels: spec.labels.clone(),
            engine,
        }
    }

    /// Dockerfile that will be used, explicit or `<context>/Dockerfile`.
    pub fn dockerfile(&self) -> PathBuf {
        self.dockerfile
            .clone()
            .unwrap_or_else(|| self.context.join(DEFAULT_DOCKERFILE))
    }

    fn check_context(&self) -> Result<(), StageError> {
        if !self.context.is_dir() {
            return Err(StageError::build(format!(
                "build context '{}' is not a directory",
                self.context.display()
            )));
        }
        let dockerfile = self.dockerfile();
        if !dockerfile.is_file() {
            return Err(StageError::build(format!(
                "image definition '{}' not found",
                dockerfile.display()
            )));
        }
        Ok(())
    }
}

impl Stage for BuildStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Build
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        self.check_context()?;
        let request = BuildRequest {
            context: self.context.clone(),
            dockerfile: self.dockerfile.clone(),
            build_args: self.build_args.clone(),
            labels: self.labels.clone(),
            reference: ctx.image().clone(),
        };
        let built = self.engine.build(&request)?;
        if built.artifact.reference != request.reference {
            return Err(StageError::build(format!(
                "engine tagged {} instead of {}",
                built.artifact.reference, request.reference
            )));
        }
        info!(
            image = %built.artifact.reference,
            digest = built.artifact.short_digest(),
            "Image built"
        );
        Ok(StageOutput {
            log: built.log,
            artifact: Some(built.artifact),
        })
    }
}
