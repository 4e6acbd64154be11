use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::definition::{
    BuildSpec, DEFINITION_VERSION, PipelineDefinition, PublishSpec, StageSpec, TestSpec,
};

pub const PRESETS: [&str; 3] = ["python", "rust", "generic"];

pub fn preset_definition(name: &str) -> Result<PipelineDefinition> {
    let test_command: &[&str] = match name {
        "python" => &["python", "-m", "pytest", "tests"],
        "rust" => &["cargo", "test", "--locked"],
        "generic" => &["sh", "-c", "./run-tests.sh"],
        other => bail!("Unknown preset '{other}'. Available presets: {}", PRESETS.join(", ")),
    };

    Ok(PipelineDefinition {
        version: DEFINITION_VERSION,
        image: Some("my-org/my-app".into()),
        pipeline: vec![
            StageSpec::Build(BuildSpec {
                name: None,
                context: PathBuf::from("."),
                dockerfile: None,
                build_args: BTreeMap::new(),
                labels: BTreeMap::new(),
            }),
            StageSpec::Test(TestSpec {
                name: Some("unit-tests".into()),
                command: test_command.iter().map(|s| (*s).to_string()).collect(),
                env: BTreeMap::new(),
                workdir: None,
            }),
            StageSpec::Publish(PublishSpec {
                name: None,
                tags: Vec::new(),
            }),
        ],
    })
}

pub fn generate_preset(name: &str, destination: &Path) -> Result<PathBuf> {
    let preset = preset_definition(name)?;
    let rendered = serde_yaml::to_string(&preset)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write pipeline definition: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::check_stage_order;

    #[test]
    fn every_preset_has_a_valid_stage_order() {
        for name in PRESETS {
            let definition = preset_definition(name).unwrap();
            check_stage_order(&definition.stage_kinds()).unwrap();
        }
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(preset_definition("cobol").is_err());
    }

    #[test]
    fn rendered_preset_round_trips_through_loader() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ci/imageci.yaml");
        generate_preset("python", &path).unwrap();
        let loaded = PipelineDefinition::load(&path).unwrap();
        assert_eq!(loaded.pipeline, preset_definition("python").unwrap().pipeline);
    }
}
