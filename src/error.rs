use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Failure raised by a single stage. The coordinator never recovers from one.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("image build failed: {message}")]
    Build { message: String, output: String },

    #[error("test container could not be started: {message}")]
    Environment { message: String, output: String },

    #[error("test command exited with status {code}")]
    TestFailure { code: i32, output: String },

    #[error("registry authentication failed for {registry}: {message}")]
    Auth { registry: String, message: String },

    #[error("publishing {destination} was rejected: {message}")]
    Publish {
        destination: String,
        message: String,
        output: String,
    },
}

impl StageError {
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn auth(registry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            registry: registry.into(),
            message: message.into(),
        }
    }

    pub fn publish(
        destination: impl Into<String>,
        message: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::Publish {
            destination: destination.into(),
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Build { .. } => ErrorKind::BuildError,
            Self::Environment { .. } => ErrorKind::EnvironmentError,
            Self::TestFailure { .. } => ErrorKind::TestFailure,
            Self::Auth { .. } => ErrorKind::AuthError,
            Self::Publish { .. } => ErrorKind::PublishError,
        }
    }

    /// Output captured from the external tool, empty when nothing was produced.
    pub fn output(&self) -> &str {
        match self {
            Self::Build { output, .. }
            | Self::Environment { output, .. }
            | Self::TestFailure { output, .. }
            | Self::Publish { output, .. } => output,
            Self::Auth { .. } => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    BuildError,
    EnvironmentError,
    TestFailure,
    AuthError,
    PublishError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BuildError => "BuildError",
            Self::EnvironmentError => "EnvironmentError",
            Self::TestFailure => "TestFailure",
            Self::AuthError => "AuthError",
            Self::PublishError => "PublishError",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(StageError::build("x").kind(), ErrorKind::BuildError);
        assert_eq!(
            StageError::TestFailure {
                code: 1,
                output: "boom".into()
            }
            .kind(),
            ErrorKind::TestFailure
        );
        assert_eq!(StageError::auth("docker.io", "denied").kind(), ErrorKind::AuthError);
    }

    #[test]
    fn auth_errors_carry_no_output() {
        let err = StageError::auth("ghcr.io", "token expired");
        assert_eq!(err.output(), "");
        assert_eq!(
            err.to_string(),
            "registry authentication failed for ghcr.io: token expired"
        );
    }
}
