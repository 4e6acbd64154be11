use std::fs;
use std::path::Path;

use imageci::config::RunConfig;
use imageci::definition::PipelineDefinition;
use imageci::lockfile::{generate_lock, lock_definition};
use imageci::validation::{validate_definition, validate_run_config};
use tempfile::tempdir;

fn parse(yaml: &str) -> PipelineDefinition {
    serde_yaml::from_str(yaml).unwrap()
}

fn with_dockerfile(dir: &Path) {
    fs::write(dir.join("Dockerfile"), "FROM alpine:3.19\n").unwrap();
}

#[test]
fn complete_definition_passes() {
    let temp = tempdir().unwrap();
    with_dockerfile(temp.path());
    let definition = parse(
        r#"
version: 1
image: registry.example.com/team/app:1.0
pipeline:
  - stage: build
    build_args:
      PYTHON_VERSION: "3.8"
  - stage: test
    command: ["pytest"]
    env:
      CI: "true"
  - stage: publish
    tags: [stable]
"#,
    );
    let report = validate_definition(&definition, temp.path());
    assert!(report.is_ok(), "{:?}", report.errors);
    assert!(report.warnings.is_empty());
}

#[test]
fn missing_dockerfile_and_context_are_reported() {
    let temp = tempdir().unwrap();
    let definition = parse(
        "version: 1\npipeline:\n  - stage: build\n    context: app\n  - stage: test\n    command: [make, check]\n",
    );
    let report = validate_definition(&definition, temp.path());
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report.errors[0].contains("is not a directory"));
    assert!(report.errors[1].contains("not found"));
}

#[test]
fn custom_dockerfile_resolves_against_definition_dir() {
    let temp = tempdir().unwrap();
    fs::create_dir(temp.path().join("docker")).unwrap();
    fs::write(temp.path().join("docker/ci.Dockerfile"), "FROM alpine\n").unwrap();
    let definition = parse(
        "version: 1\npipeline:\n  - stage: build\n    dockerfile: docker/ci.Dockerfile\n  - stage: test\n    command: [make, check]\n",
    );
    assert!(validate_definition(&definition, temp.path()).is_ok());
}

#[test]
fn structural_errors_are_collected() {
    let temp = tempdir().unwrap();
    with_dockerfile(temp.path());
    let definition = parse(
        r#"
version: 2
image: "Bad Image"
pipeline:
  - stage: test
    command: []
    env:
      "A=B": x
  - stage: build
  - stage: publish
    tags: ["bad tag"]
"#,
    );
    let report = validate_definition(&definition, temp.path());
    let joined = report.errors.join("\n");
    assert!(joined.contains("Unsupported pipeline definition version: 2"));
    assert!(joined.contains("Default image 'Bad Image' is invalid"));
    assert!(joined.contains("Test command cannot be empty"));
    assert!(joined.contains("Invalid environment variable name 'A=B'"));
    assert!(joined.contains("Stage 3 ('publish')"));
}

#[test]
fn stage_names_must_be_unique() {
    let temp = tempdir().unwrap();
    with_dockerfile(temp.path());
    let definition = parse(
        "version: 1\npipeline:\n  - stage: build\n    name: test\n  - stage: test\n    command: [pytest]\n",
    );
    let report = validate_definition(&definition, temp.path());
    assert_eq!(
        report.errors,
        vec!["Stage name 'test' is used by more than one stage".to_string()]
    );
}

#[test]
fn build_only_pipeline_warns_about_missing_tests() {
    let temp = tempdir().unwrap();
    with_dockerfile(temp.path());
    let definition = parse("version: 1\npipeline:\n  - stage: build\n");
    let report = validate_definition(&definition, temp.path());
    assert!(report.is_ok());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn run_config_credential_matches_publish_needs() {
    let publishing = parse(
        "version: 1\npipeline:\n  - stage: build\n  - stage: test\n    command: [make, check]\n  - stage: publish\n",
    );
    let building = parse("version: 1\npipeline:\n  - stage: build\n");

    let anonymous = RunConfig::resolve(Some("org/app:1"), None, None).unwrap();
    let with_credential = RunConfig::resolve(Some("org/app:1"), Some("hub"), None).unwrap();

    assert!(!validate_run_config(&publishing, &anonymous).is_ok());
    assert!(validate_run_config(&publishing, &with_credential).is_ok());

    let report = validate_run_config(&building, &with_credential);
    assert!(report.is_ok());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn lockfile_lists_stages_in_order() {
    let temp = tempdir().unwrap();
    let definition = parse(
        "version: 1\nimage: org/app\npipeline:\n  - stage: build\n  - stage: test\n    name: unit\n    command: [pytest]\n",
    );

    let lock = lock_definition(&definition);
    let names: Vec<_> = lock.stages.iter().map(|stage| stage.name.as_str()).collect();
    assert_eq!(names, ["build", "unit"]);
    assert!(lock.stages.iter().all(|stage| stage.params_hash.len() == 64));

    let path = temp.path().join("imageci.lock");
    generate_lock(&definition, &path).unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("image: org/app"));
    assert!(content.contains("name: unit"));
}
