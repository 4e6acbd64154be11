use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::{TempDir, tempdir};

const DEFINITION: &str = r#"
version: 1
image: synergy/o3skim
pipeline:
  - stage: build
  - stage: test
    command: ["python", "-m", "pytest", "tests"]
  - stage: publish
"#;

fn project(definition: &str) -> (TempDir, PathBuf) {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("Dockerfile"), "FROM python:3.8\n").unwrap();
    let path = temp.path().join("imageci.yaml");
    fs::write(&path, definition).unwrap();
    (temp, path)
}

fn imageci() -> Command {
    let mut cmd = Command::cargo_bin("imageci").expect("binary present");
    cmd.env_remove("IMAGECI_REGISTRY_TARGET")
        .env_remove("IMAGECI_CREDENTIAL_ID")
        .env_remove("IMAGECI_DOCKER");
    cmd
}

#[test]
fn list_stages_names_the_fixed_sequence() {
    let output = imageci().arg("list-stages").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("- build"));
    assert!(stdout.contains("- test"));
    assert!(stdout.contains("- publish"));
}

#[test]
fn init_writes_a_definition_that_validates() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("Dockerfile"), "FROM rust:1\n").unwrap();

    imageci()
        .current_dir(temp.path())
        .args(["init", "--preset", "rust"])
        .assert()
        .success();
    assert!(temp.path().join("imageci.yaml").is_file());

    imageci()
        .current_dir(temp.path())
        .args(["validate", "imageci.yaml"])
        .assert()
        .success();
}

#[test]
fn validate_rejects_publish_without_test() {
    let (_temp, path) = project(
        "version: 1\npipeline:\n  - stage: build\n  - stage: publish\n",
    );
    imageci().arg("validate").arg(&path).assert().failure();
}

#[test]
fn validate_checks_credentials_when_configuration_is_given() {
    let (_temp, path) = project(DEFINITION);
    imageci()
        .arg("validate")
        .arg(&path)
        .args(["--registry-target", "synergy/o3skim:v1"])
        .assert()
        .failure();
    imageci()
        .arg("validate")
        .arg(&path)
        .args(["--registry-target", "synergy/o3skim:v1"])
        .env("IMAGECI_CREDENTIAL_ID", "dockerhub")
        .assert()
        .success();
}

#[test]
fn dry_run_requires_credential_for_publish() {
    let (_temp, path) = project(DEFINITION);
    imageci()
        .args(["run", "--dry-run"])
        .arg(&path)
        .assert()
        .code(1);
    imageci()
        .args(["run", "--dry-run", "--credential-id", "dockerhub"])
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn lock_writes_stage_hashes() {
    let (temp, path) = project(DEFINITION);
    let lock = temp.path().join("out/imageci.lock");
    imageci().arg("lock").arg(&path).arg(&lock).assert().success();

    let content = fs::read_to_string(&lock).unwrap();
    assert!(content.contains("definition_version: 1"));
    assert!(content.contains("params_hash"));
    assert!(content.contains("kind: publish"));
}

#[cfg(unix)]
const FAKE_DOCKER: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_DOCKER_LOG"
case "$1" in
  --version) echo "Docker version 24.0.7"; exit 0 ;;
  build)
    if [ -n "$FAKE_BUILD_FAIL" ]; then echo "build exploded" >&2; exit 1; fi
    while [ $# -gt 0 ]; do
      if [ "$1" = "--iidfile" ]; then printf 'sha256:abc123def456\n' > "$2"; fi
      shift
    done
    echo "Successfully built"; exit 0 ;;
  create) echo "cid42"; exit 0 ;;
  start)
    if [ -n "$FAKE_START_FAIL" ]; then
      echo 'Error response from daemon: exec: "python": executable file not found in $PATH' >&2
      exit 1
    fi
    exit 0 ;;
  wait) echo "${FAKE_TEST_EXIT:-0}"; exit 0 ;;
  logs) echo "12 passed"; exit 0 ;;
  rm) exit 0 ;;
  login)
    cat > /dev/null
    if [ -n "$FAKE_LOGIN_FAIL" ]; then echo "unauthorized" >&2; exit 1; fi
    exit 0 ;;
  tag|push|logout) exit 0 ;;
esac
exit 1
"#;

#[cfg(unix)]
fn install_fake_docker(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-docker");
    fs::write(&path, FAKE_DOCKER).unwrap();
    let mut permissions = fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn run_maps_each_outcome_to_an_exit_code() {
    let (temp, path) = project(DEFINITION);
    let docker = install_fake_docker(temp.path());
    let log = temp.path().join("docker.log");

    let run = |extra_env: &[(&str, &str)]| {
        let _ = fs::remove_file(&log);
        let mut cmd = imageci();
        cmd.arg("run")
            .arg(&path)
            .arg("--docker-bin")
            .arg(&docker)
            .args(["--credential-id", "hub"])
            .env("FAKE_DOCKER_LOG", &log)
            .env("IMAGECI_CREDENTIAL_HUB_USERNAME", "ci-bot")
            .env("IMAGECI_CREDENTIAL_HUB_PASSWORD", "hunter2");
        for (key, value) in extra_env {
            cmd.env(key, value);
        }
        let output = cmd.output().unwrap();
        let calls = fs::read_to_string(&log).unwrap_or_default();
        (output, calls)
    };

    let (output, calls) = run(&[]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Succeeded"));
    assert!(calls.contains("create --entrypoint= sha256:abc123def456 python -m pytest tests"));
    assert!(calls.contains("tag sha256:abc123def456 synergy/o3skim:latest"));
    assert!(calls.contains("logout docker.io"));
    assert!(!calls.contains("hunter2"));

    let (output, calls) = run(&[("FAKE_TEST_EXIT", "1")]);
    assert_eq!(output.status.code(), Some(3));
    assert!(calls.contains("rm --force cid42"));
    assert!(!calls.contains("push"));

    let report = temp.path().join("report.json");
    let failure_kind = |env: &[(&str, &str)]| {
        let _ = fs::remove_file(&log);
        let output = imageci()
            .arg("run")
            .arg(&path)
            .arg("--docker-bin")
            .arg(&docker)
            .args(["--credential-id", "hub"])
            .arg("--report-json")
            .arg(&report)
            .env("FAKE_DOCKER_LOG", &log)
            .envs(env.iter().copied())
            .output()
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        let calls = fs::read_to_string(&log).unwrap_or_default();
        (output.status.code(), json["failure"]["error"].clone(), calls)
    };

    let (code, kind, calls) = failure_kind(&[("FAKE_START_FAIL", "1")]);
    assert_eq!(code, Some(3));
    assert_eq!(kind, "EnvironmentError");
    assert!(calls.contains("rm --force cid42"));
    assert!(!calls.contains("push"));

    let (code, kind, calls) = failure_kind(&[("FAKE_TEST_EXIT", "125")]);
    assert_eq!(code, Some(3));
    assert_eq!(kind, "TestFailure");
    assert!(calls.contains("rm --force cid42"));

    let (output, calls) = run(&[("FAKE_BUILD_FAIL", "1")]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!calls.contains("create"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("build exploded"));

    let (output, calls) = run(&[("FAKE_LOGIN_FAIL", "1")]);
    assert_eq!(output.status.code(), Some(4));
    assert!(!calls.contains("push"));
}
