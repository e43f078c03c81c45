//! Build executors for the local and CI strategies.

use crate::error::ExecutorError;
use rbc_common::TargetArch;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// Something that turns a source tree into binaries for one target.
pub trait BuildExecutor: Send + Sync {
    /// Build `version` from `source` for `target`, returning the artifact paths.
    fn compile(
        &self,
        version: &str,
        source: &Path,
        target: TargetArch,
    ) -> impl Future<Output = Result<Vec<PathBuf>, ExecutorError>> + Send;
}

/// Runs `<program> [args..] <version> <source_path> <target>`.
///
/// The command prints one artifact path per line on stdout. Relative paths
/// are taken relative to the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Parse a whitespace-separated command line from configuration.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl BuildExecutor for CommandExecutor {
    async fn compile(
        &self,
        version: &str,
        source: &Path,
        target: TargetArch,
    ) -> Result<Vec<PathBuf>, ExecutorError> {
        info!(program = %self.program, version, target = %target, "Running build command");
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(version)
            .arg(source)
            .arg(target.to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecutorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExecutorError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let artifacts: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let path = PathBuf::from(line);
                if path.is_relative() {
                    source.join(path)
                } else {
                    path
                }
            })
            .collect();
        debug!(program = %self.program, count = artifacts.len(), "Build command finished");

        if artifacts.is_empty() {
            return Err(ExecutorError::NoArtifacts {
                program: self.program.clone(),
            });
        }
        Ok(artifacts)
    }
}
