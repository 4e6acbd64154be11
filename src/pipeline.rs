use std::fmt;
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::artifact::{ImageArtifact, ImageReference};
use crate::config::RunConfig;
use crate::credentials::CredentialHandle;
use crate::error::{ErrorKind, StageError};
use crate::observability::MetricsCollector;
use crate::policy::{NoRetry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Build,
    Test,
    Publish,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Build, StageKind::Test, StageKind::Publish];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Test => "test",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageStatus {
    NotRun,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Terminal result of a run as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Succeeded,
    FailedAtBuild,
    FailedAtTest,
    FailedAtPublish,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::FailedAtBuild => 2,
            Self::FailedAtTest => 3,
            Self::FailedAtPublish => 4,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Succeeded => "Succeeded",
            Self::FailedAtBuild => "Failed-at-Build",
            Self::FailedAtTest => "Failed-at-Test",
            Self::FailedAtPublish => "Failed-at-Publish",
        };
        f.write_str(label)
    }
}

/// What a stage sees while it executes. `credential` is only populated for
/// publish stages.
pub struct StageContext<'a> {
    image: &'a ImageReference,
    artifact: Option<&'a ImageArtifact>,
    credential: Option<&'a CredentialHandle>,
}

impl<'a> StageContext<'a> {
    pub fn image(&self) -> &'a ImageReference {
        self.image
    }

    pub fn artifact(&self) -> Option<&'a ImageArtifact> {
        self.artifact
    }

    pub fn credential(&self) -> Option<&'a CredentialHandle> {
        self.credential
    }
}

#[derive(Debug, Default)]
pub struct StageOutput {
    pub log: String,
    /// Set by the build stage only.
    pub artifact: Option<ImageArtifact>,
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> StageKind;
    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub kind: StageKind,
    pub status: StageStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<String>,
    pub duration_ms: f64,
}

impl StageRecord {
    fn pending(stage: &dyn Stage) -> Self {
        Self {
            name: stage.name().to_string(),
            kind: stage.kind(),
            status: StageStatus::NotRun,
            attempts: 0,
            output: None,
            artifact_digest: None,
            duration_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub kind: StageKind,
    pub error: ErrorKind,
    pub message: String,
    pub output: String,
}

/// One execution of the pipeline. Only the executor constructs and mutates it.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    image: ImageReference,
    credential: Option<CredentialHandle>,
    status: RunStatus,
    stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<ImageArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<StageFailure>,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    fn start(config: &RunConfig, stages: &[Box<dyn Stage>]) -> Self {
        Self {
            image: config.registry_target.clone(),
            credential: config.credential_id.clone(),
            status: RunStatus::Pending,
            stages: stages.iter().map(|s| StageRecord::pending(s.as_ref())).collect(),
            artifact: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    pub fn credential(&self) -> Option<&CredentialHandle> {
        self.credential.as_ref()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.kind == kind)
    }

    /// The built artifact, only once the whole run succeeded.
    pub fn artifact(&self) -> Option<&ImageArtifact> {
        match self.status {
            RunStatus::Succeeded => self.artifact.as_ref(),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn outcome(&self) -> RunOutcome {
        match &self.failure {
            None => RunOutcome::Succeeded,
            Some(failure) => match failure.kind {
                StageKind::Build => RunOutcome::FailedAtBuild,
                StageKind::Test => RunOutcome::FailedAtTest,
                StageKind::Publish => RunOutcome::FailedAtPublish,
            },
        }
    }
}

/// Checks the fixed stage order: one build, first; at most one test, after it;
/// at most one publish, after the test.
pub fn check_stage_order(kinds: &[StageKind]) -> Result<()> {
    if kinds.is_empty() {
        bail!("Pipeline must contain at least one stage");
    }
    if kinds[0] != StageKind::Build {
        bail!("The first stage must be a build stage, found '{}'", kinds[0]);
    }
    for kind in StageKind::ALL {
        let count = kinds.iter().filter(|k| **k == kind).count();
        if count > 1 {
            bail!("Pipeline declares {count} {kind} stages; at most one is allowed");
        }
    }
    if let Some(publish) = kinds.iter().position(|k| *k == StageKind::Publish) {
        let tested = kinds[..publish].contains(&StageKind::Test);
        if !tested {
            bail!("The publish stage must follow a test stage");
        }
    }
    Ok(())
}

pub struct PipelineExecutor {
    stages: Vec<Box<dyn Stage>>,
    metrics: MetricsCollector,
    retry: Box<dyn RetryPolicy>,
}

impl PipelineExecutor {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        let kinds: Vec<StageKind> = stages.iter().map(|stage| stage.kind()).collect();
        check_stage_order(&kinds)?;
        Ok(Self {
            stages,
            metrics: MetricsCollector::new(),
            retry: Box::new(NoRetry),
        })
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(policy);
        self
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    #[instrument(skip_all, fields(image = %config.registry_target))]
    pub fn run(&self, config: &RunConfig) -> PipelineRun {
        let total_start = Instant::now();
        let mut run = PipelineRun::start(config, &self.stages);
        let mut artifact: Option<ImageArtifact> = None;
        run.status = RunStatus::Running;
        info!(stages = self.stages.len(), "Pipeline run started");

        for (idx, stage) in self.stages.iter().enumerate() {
            let span = tracing::span!(
                tracing::Level::INFO,
                "stage",
                stage = stage.name(),
                kind = %stage.kind()
            );
            let _span_guard = span.enter();
            run.stages[idx].status = StageStatus::Running;

            let ctx = StageContext {
                image: &config.registry_target,
                artifact: artifact.as_ref(),
                credential: match stage.kind() {
                    StageKind::Publish => config.credential_id.as_ref(),
                    StageKind::Build | StageKind::Test => None,
                },
            };
            let mut timer = self.metrics.start_stage(stage.name());
            let (result, attempts) = self.attempt(stage.as_ref(), &ctx);
            if result.is_err() {
                timer.mark_failed();
            }
            let record = &mut run.stages[idx];
            record.attempts = attempts;
            record.duration_ms = timer.elapsed().as_secs_f64() * 1_000.0;
            drop(timer);

            match result {
                Ok(output) => {
                    record.status = StageStatus::Succeeded;
                    record.output = (!output.log.is_empty()).then_some(output.log);
                    match (stage.kind(), output.artifact) {
                        (StageKind::Build, Some(built)) => {
                            record.artifact_digest = Some(built.digest.clone());
                            artifact = Some(built);
                        }
                        (_, Some(_)) => {
                            warn!("Ignoring artifact returned by a non-build stage");
                        }
                        (_, None) => {}
                    }
                    if stage.kind() != StageKind::Build {
                        record.artifact_digest = artifact.as_ref().map(|a| a.digest.clone());
                    }
                    info!(duration_ms = record.duration_ms, "Stage succeeded");
                }
                Err(err) => {
                    record.status = StageStatus::Failed;
                    let output = err.output().to_string();
                    record.output = (!output.is_empty()).then(|| output.clone());
                    error!(error_kind = %err.kind(), "Stage failed: {err}");
                    run.failure = Some(StageFailure {
                        stage: stage.name().to_string(),
                        kind: stage.kind(),
                        error: err.kind(),
                        message: err.to_string(),
                        output,
                    });
                    return self.finish(run, artifact, RunStatus::Failed, total_start);
                }
            }
        }

        self.finish(run, artifact, RunStatus::Succeeded, total_start)
    }

    fn attempt(&self, stage: &dyn Stage, ctx: &StageContext<'_>) -> (Result<StageOutput, StageError>, u32) {
        let mut attempt = 1;
        loop {
            info!(attempt, "Stage started");
            match stage.run(ctx) {
                Err(err) if self.retry.should_retry(stage.kind(), attempt, &err) => {
                    warn!(attempt, "Stage attempt failed, retrying: {err}");
                    attempt += 1;
                }
                result => return (result, attempt),
            }
        }
    }

    fn finish(
        &self,
        mut run: PipelineRun,
        artifact: Option<ImageArtifact>,
        status: RunStatus,
        total_start: Instant,
    ) -> PipelineRun {
        // A build stage always yields an artifact on success.
        if status == RunStatus::Succeeded && artifact.is_none() {
            warn!("Pipeline finished without an image artifact");
        }
        run.artifact = artifact;
        run.status = status;
        run.finished_at = Some(Utc::now());
        self.metrics.record_total_duration(total_start.elapsed());
        match status {
            RunStatus::Succeeded => self.metrics.record_run_success(),
            _ => self.metrics.record_run_failure(),
        }
        info!(outcome = %run.outcome(), "Pipeline run finished");
        run
    }
}
