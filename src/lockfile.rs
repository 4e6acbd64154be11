use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::definition::{PipelineDefinition, StageSpec};
use crate::pipeline::StageKind;

#[derive(Debug, Serialize)]
pub struct PipelineLock {
    pub definition_version: u32,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub stages: Vec<StageLock>,
}

#[derive(Debug, Serialize)]
pub struct StageLock {
    pub name: String,
    pub kind: StageKind,
    pub params_hash: String,
}

pub fn lock_definition(definition: &PipelineDefinition) -> PipelineLock {
    let stages = definition
        .pipeline
        .iter()
        .map(|spec| StageLock {
            name: spec.name(),
            kind: spec.kind(),
            params_hash: hash_params(spec),
        })
        .collect();

    PipelineLock {
        definition_version: definition.version,
        generated_at: Utc::now(),
        image: definition.image.clone(),
        stages,
    }
}

pub fn generate_lock(definition: &PipelineDefinition, path: &Path) -> Result<()> {
    let lock = lock_definition(definition);
    let file = File::create(path)
        .with_context(|| format!("Failed to create lockfile: {}", path.display()))?;
    serde_yaml::to_writer(file, &lock)
        .with_context(|| format!("Failed to write lockfile: {}", path.display()))?;
    Ok(())
}

fn hash_params(spec: &StageSpec) -> String {
    let mut hasher = Sha256::new();
    // BTreeMap fields keep the serialized form stable.
    let serialized = serde_json::to_vec(spec).unwrap_or_default();
    hasher.update(spec.kind().as_str().as_bytes());
    hasher.update(serialized);
    format!("{:x}", hasher.finalize())
}
