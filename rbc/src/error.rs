//! Error types for the build client.

use crate::strategy::BuildStrategy;
use rbc_common::{ErrorCode, ValidationError};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the coordinator or handling its artifact.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("missing configuration: {field} is not set")]
    MissingConfiguration { field: &'static str },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("coordinator unreachable: {0}")]
    Unreachable(String),

    #[error("coordinator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unexpected coordinator response: {0}")]
    Protocol(String),

    #[error("build {build_id} did not finish within {}s", .elapsed.as_secs())]
    Timeout { build_id: String, elapsed: Duration },

    #[error("build {build_id} failed: {message}")]
    BuildFailed { build_id: String, message: String },

    #[error("build {build_id} completed without a binary URL")]
    MissingArtifactUrl { build_id: String },

    #[error("downloaded artifact {} is empty", .path.display())]
    EmptyArtifact { path: PathBuf },

    #[error("failed to write artifact {}: {source}", .path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set permissions on {}: {source}", .path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingConfiguration { field: "api_key" } => ErrorCode::ConfigMissingCredentials,
            Self::MissingConfiguration { .. } => ErrorCode::ConfigMissingCoordinator,
            Self::Validation(err) => err.code(),
            Self::Unreachable(_) => ErrorCode::CoordinatorUnreachable,
            Self::Http { .. } => ErrorCode::CoordinatorHttpError,
            Self::Protocol(_) => ErrorCode::CoordinatorProtocolError,
            Self::Timeout { .. } => ErrorCode::BuildTimeout,
            Self::BuildFailed { .. } => ErrorCode::BuildFailed,
            Self::MissingArtifactUrl { .. } => ErrorCode::ArtifactUrlMissing,
            Self::EmptyArtifact { .. } => ErrorCode::ArtifactEmpty,
            Self::ArtifactWrite { .. } => ErrorCode::ArtifactWriteFailed,
            Self::Permissions { .. } => ErrorCode::ArtifactPermissions,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unreachable(format!("request timed out: {err}"))
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Failure of an external build command.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", describe_exit(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} reported no artifacts")]
    NoArtifacts { program: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Failure of one build strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] ClientError),

    #[error("local build failed: {0}")]
    Local(#[source] ExecutorError),

    #[error("CI build failed: {0}")]
    Ci(#[source] ExecutorError),

    #[error("no executor configured for the {0} strategy")]
    NotConfigured(BuildStrategy),
}

impl StrategyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid(err) => err.code(),
            Self::Remote(err) => err.code(),
            Self::Local(_) => ErrorCode::LocalCompileFailed,
            Self::Ci(_) => ErrorCode::CiBuildFailed,
            Self::NotConfigured(_) => ErrorCode::ExecutorNotConfigured,
        }
    }
}

/// Stage of a build at which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Validate,
    Submit,
    Poll,
    Retrieve,
    LocalCompile,
    CiBuild,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::Submit => "submit",
            Self::Poll => "poll",
            Self::Retrieve => "retrieve",
            Self::LocalCompile => "local compile",
            Self::CiBuild => "ci build",
        };
        f.write_str(name)
    }
}

/// An error tagged with the step that produced it.
#[derive(Debug, Error)]
#[error("{step} step failed: {error}")]
pub struct StepError {
    pub step: BuildStep,
    #[source]
    pub error: StrategyError,
}

impl StepError {
    pub fn new(step: BuildStep, error: impl Into<StrategyError>) -> Self {
        Self {
            step,
            error: error.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }
}
