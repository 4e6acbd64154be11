use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::StageKind;

pub const DEFINITION_VERSION: u32 = 1;

/// Pipeline definition file (`imageci.yaml`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineDefinition {
    pub version: u32,
    /// Image reference used when no registry target is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub pipeline: Vec<StageSpec>,
}

impl PipelineDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline definition: {}", path.display()))?;
        let definition: PipelineDefinition = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse pipeline YAML: {}", path.display()))?;
        Ok(definition)
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.pipeline.iter().map(StageSpec::kind).collect()
    }

    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.pipeline.iter().any(|spec| spec.kind() == kind)
    }
}

/// Directory relative build paths resolve against.
pub fn base_dir(definition_path: &Path) -> PathBuf {
    match definition_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum StageSpec {
    Build(BuildSpec),
    Test(TestSpec),
    Publish(PublishSpec),
}

impl StageSpec {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Build(_) => StageKind::Build,
            Self::Test(_) => StageKind::Test,
            Self::Publish(_) => StageKind::Publish,
        }
    }

    pub fn name(&self) -> String {
        let custom = match self {
            Self::Build(spec) => spec.name.as_deref(),
            Self::Test(spec) => spec.name.as_deref(),
            Self::Publish(spec) => spec.name.as_deref(),
        };
        custom.unwrap_or(self.kind().as_str()).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_context")]
    pub context: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PublishSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extra tags pushed alongside the target tag, all for the same digest.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}
