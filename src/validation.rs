use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::artifact::{ImageReference, validate_tag};
use crate::config::RunConfig;
use crate::definition::{DEFINITION_VERSION, PipelineDefinition, StageSpec};
use crate::pipeline::{StageKind, check_stage_order};
use crate::stages::DEFAULT_DOCKERFILE;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_definition(definition: &PipelineDefinition, base_dir: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    if definition.version != DEFINITION_VERSION {
        report.errors.push(format!(
            "Unsupported pipeline definition version: {}",
            definition.version
        ));
    }

    if let Some(image) = &definition.image
        && let Err(err) = image.parse::<ImageReference>()
    {
        report
            .errors
            .push(format!("Default image '{image}' is invalid: {err}"));
    }

    if let Err(err) = check_stage_order(&definition.stage_kinds()) {
        report.errors.push(err.to_string());
    }

    let mut seen = HashSet::new();
    for stage in &definition.pipeline {
        let name = stage.name();
        if !seen.insert(name.clone()) {
            report
                .errors
                .push(format!("Stage name '{name}' is used by more than one stage"));
        }
    }

    if !definition.has_stage(StageKind::Test) {
        report
            .warnings
            .push("Pipeline has no test stage; the image is never exercised".into());
    }

    for (idx, stage) in definition.pipeline.iter().enumerate() {
        let mut stage_report = validate_stage(stage, base_dir);
        let label = format!("Stage {} ('{}')", idx + 1, stage.name());
        stage_report.errors = stage_report
            .errors
            .into_iter()
            .map(|msg| format!("{label}: {msg}"))
            .collect();
        stage_report.warnings = stage_report
            .warnings
            .into_iter()
            .map(|msg| format!("{label}: {msg}"))
            .collect();
        report.merge(stage_report);
    }

    report
}

/// Checks that the run configuration satisfies what the definition needs.
pub fn validate_run_config(definition: &PipelineDefinition, config: &RunConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    if definition.has_stage(StageKind::Publish) && config.credential_id.is_none() {
        report.errors.push(
            "A credential id is required for the publish stage (set IMAGECI_CREDENTIAL_ID or --credential-id)"
                .into(),
        );
    }
    if !definition.has_stage(StageKind::Publish) && config.credential_id.is_some() {
        report
            .warnings
            .push("A credential id is configured but the pipeline never publishes".into());
    }
    report
}

fn validate_stage(stage: &StageSpec, base_dir: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();
    match stage {
        StageSpec::Build(build) => {
            let context = base_dir.join(&build.context);
            if !context.is_dir() {
                report.errors.push(format!(
                    "Build context '{}' is not a directory",
                    context.display()
                ));
            }
            let dockerfile = build
                .dockerfile
                .as_ref()
                .map_or_else(|| context.join(DEFAULT_DOCKERFILE), |path| base_dir.join(path));
            if !dockerfile.is_file() {
                report.errors.push(format!(
                    "Image definition '{}' not found",
                    dockerfile.display()
                ));
            }
            for key in build.build_args.keys().chain(build.labels.keys()) {
                if key.trim().is_empty() || key.contains('=') {
                    report
                        .errors
                        .push(format!("Invalid build argument or label name '{key}'"));
                }
            }
        }
        StageSpec::Test(test) => {
            match test.command.first() {
                None => report.errors.push("Test command cannot be empty".into()),
                Some(program) if program.trim().is_empty() => {
                    report.errors.push("Test command program cannot be blank".into());
                }
                Some(_) => {}
            }
            for key in test.env.keys() {
                if key.trim().is_empty() || key.contains('=') {
                    report
                        .errors
                        .push(format!("Invalid environment variable name '{key}'"));
                }
            }
        }
        StageSpec::Publish(publish) => {
            for tag in &publish.tags {
                if let Err(err) = validate_tag(tag) {
                    report.errors.push(err.to_string());
                }
            }
        }
    }
    report
}
