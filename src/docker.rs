//! Container CLI backend.
//!
//! Drives `docker` (or any CLI with the same surface, e.g. `podman`) through
//! `std::process::Command` for build, test containers and registry access.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::artifact::{ImageArtifact, ImageReference};
use crate::backend::{
    BuildEngine, BuildOutput, BuildRequest, CommandOutcome, ContainerRuntime, ContainerSpec,
    RegistryClient,
};
use crate::credentials::RegistryCredentials;
use crate::error::StageError;

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Fails when the CLI cannot be executed at all.
    pub fn check_available(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .with_context(|| {
                format!(
                    "Failed to execute '{} --version'. Is it installed?",
                    self.binary.display()
                )
            })?;
        if !output.status.success() {
            anyhow::bail!("'{}' is not working correctly", self.binary.display());
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Container CLI available: {version}");
        Ok(version)
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn exec(&self, mut command: Command) -> std::io::Result<Output> {
        debug!(command = ?command, "Invoking container CLI");
        command.stdin(Stdio::null()).output()
    }

    /// Runs a container subcommand whose failure means the container itself
    /// is unusable, not that the test command failed.
    fn container_step(&self, args: &[&str]) -> Result<Output, StageError> {
        let mut command = self.command();
        command.args(args);
        let output = self.exec(command).map_err(|err| {
            StageError::environment(format!(
                "failed to run '{} {}': {err}",
                self.binary.display(),
                args.join(" ")
            ))
        })?;
        if !output.status.success() {
            return Err(StageError::Environment {
                message: format!("'{}' exited with {}", args.join(" "), describe_status(&output)),
                output: combined_output(&output),
            });
        }
        Ok(output)
    }
}

impl BuildEngine for DockerCli {
    fn build(&self, request: &BuildRequest) -> Result<BuildOutput, StageError> {
        let scratch = tempfile::Builder::new()
            .prefix("imageci-build")
            .tempdir()
            .map_err(|err| StageError::build(format!("failed to create scratch directory: {err}")))?;
        let iidfile = scratch.path().join("iid");

        let mut command = self.command();
        command
            .arg("build")
            .arg("--tag")
            .arg(request.reference.to_string())
            .arg("--iidfile")
            .arg(&iidfile);
        if let Some(dockerfile) = &request.dockerfile {
            command.arg("--file").arg(dockerfile);
        }
        for (key, value) in &request.build_args {
            command.arg("--build-arg").arg(format!("{key}={value}"));
        }
        for (key, value) in &request.labels {
            command.arg("--label").arg(format!("{key}={value}"));
        }
        command.arg(&request.context);

        let output = self.exec(command).map_err(|err| {
            StageError::build(format!(
                "failed to run '{} build': {err}",
                self.binary.display()
            ))
        })?;
        let log = combined_output(&output);
        if !output.status.success() {
            return Err(StageError::Build {
                message: format!("engine exited with {}", describe_status(&output)),
                output: log,
            });
        }

        // The ID comes from this build, not from whatever the tag points at now.
        let digest = fs::read_to_string(&iidfile)
            .map(|id| id.trim().to_string())
            .unwrap_or_default();
        if digest.is_empty() {
            return Err(StageError::Build {
                message: format!("engine reported no image ID for {}", request.reference),
                output: log,
            });
        }
        Ok(BuildOutput {
            artifact: ImageArtifact::new(request.reference.clone(), digest),
            log,
        })
    }
}

impl ContainerRuntime for DockerCli {
    fn create(&self, spec: &ContainerSpec) -> Result<String, StageError> {
        let mut command = self.command();
        command.arg("create").arg("--entrypoint=");
        for (key, value) in &spec.env {
            command.arg("--env").arg(format!("{key}={value}"));
        }
        if let Some(workdir) = &spec.workdir {
            command.arg("--workdir").arg(workdir);
        }
        command.arg(&spec.image_digest).args(&spec.command);

        let output = self.exec(command).map_err(|err| {
            StageError::environment(format!(
                "failed to run '{} create': {err}",
                self.binary.display()
            ))
        })?;
        if !output.status.success() {
            return Err(StageError::Environment {
                message: format!("container creation exited with {}", describe_status(&output)),
                output: combined_output(&output),
            });
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(StageError::environment("runtime reported no container ID"));
        }
        Ok(id)
    }

    fn start_and_wait(&self, container_id: &str) -> Result<CommandOutcome, StageError> {
        self.container_step(&["start", container_id])?;
        let waited = self.container_step(&["wait", container_id])?;
        let status = String::from_utf8_lossy(&waited.stdout).trim().to_string();
        let exit_code = status.parse::<i32>().map_err(|_| {
            StageError::environment(format!(
                "container {container_id} reported an unreadable exit status '{status}'"
            ))
        })?;
        let logs = self.container_step(&["logs", container_id])?;
        Ok(CommandOutcome {
            exit_code,
            output: combined_output(&logs),
        })
    }

    fn remove(&self, container_id: &str) -> Result<(), StageError> {
        let mut command = self.command();
        command.args(["rm", "--force", container_id]);
        let output = self
            .exec(command)
            .map_err(|err| StageError::environment(format!("failed to remove container: {err}")))?;
        if !output.status.success() {
            return Err(StageError::Environment {
                message: format!("could not remove container {container_id}"),
                output: combined_output(&output),
            });
        }
        Ok(())
    }
}

impl RegistryClient for DockerCli {
    fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<(), StageError> {
        let mut child = self
            .command()
            .args([
                "login",
                "--username",
                credentials.username.as_str(),
                "--password-stdin",
                registry,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| StageError::auth(registry, format!("failed to run login: {err}")))?;

        if let Some(mut stdin) = child.stdin.take()
            && let Err(err) = stdin.write_all(credentials.secret.expose().as_bytes())
        {
            drop(stdin);
            let _ = child.kill();
            let _ = child.wait();
            return Err(StageError::auth(
                registry,
                format!("failed to pass credential: {err}"),
            ));
        }

        let output = child
            .wait_with_output()
            .map_err(|err| StageError::auth(registry, format!("login did not complete: {err}")))?;
        if !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(StageError::auth(
                registry,
                if reason.is_empty() {
                    "credential rejected".to_string()
                } else {
                    reason
                },
            ));
        }
        Ok(())
    }

    fn push(
        &self,
        artifact: &ImageArtifact,
        destination: &ImageReference,
    ) -> Result<String, StageError> {
        let publish_error = |message: String, output: String| StageError::Publish {
            destination: destination.to_string(),
            message,
            output,
        };

        let mut tag = self.command();
        tag.arg("tag")
            .arg(&artifact.digest)
            .arg(destination.to_string());
        let output = self
            .exec(tag)
            .map_err(|err| publish_error(format!("failed to run tag: {err}"), String::new()))?;
        if !output.status.success() {
            return Err(publish_error(
                format!("could not tag {}", artifact.short_digest()),
                combined_output(&output),
            ));
        }

        let mut push = self.command();
        push.arg("push").arg(destination.to_string());
        let output = self
            .exec(push)
            .map_err(|err| publish_error(format!("failed to run push: {err}"), String::new()))?;
        let log = combined_output(&output);
        if !output.status.success() {
            return Err(publish_error(
                format!("registry exited with {}", describe_status(&output)),
                log,
            ));
        }
        Ok(log)
    }

    fn logout(&self, registry: &str) -> Result<(), StageError> {
        let mut command = self.command();
        command.args(["logout", registry]);
        let output = self.exec(command).map_err(|err| {
            StageError::publish(registry, format!("failed to run logout: {err}"), String::new())
        })?;
        if !output.status.success() {
            return Err(StageError::publish(
                registry,
                format!("logout exited with {}", describe_status(&output)),
                combined_output(&output),
            ));
        }
        Ok(())
    }
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.trim_end().to_string(),
        (true, false) => stderr.trim_end().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
    }
}

fn describe_status(output: &Output) -> String {
    output
        .status
        .code()
        .map_or_else(|| "a signal".to_string(), |code| format!("status {code}"))
}
