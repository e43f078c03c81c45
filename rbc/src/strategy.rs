//! Build strategy selection and execution.
//!
//! A build runs locally when the target matches the host, remotely through
//! the coordinator when it does not, or through CI when asked. A failed local
//! build may be retried once remotely.

use crate::error::{BuildStep, StepError, StrategyError};
use crate::executor::BuildExecutor;
use crate::remote::{CoordinatorApi, HttpCoordinator, RemoteBuildClient};
use rbc_common::{BuildRequest, TargetArch, ValidationError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildStrategy {
    #[serde(rename = "local_only")]
    Local,
    #[serde(rename = "remote_only")]
    Remote,
    #[serde(rename = "ci")]
    Ci,
}

impl BuildStrategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local_only",
            Self::Remote => "remote_only",
            Self::Ci => "ci",
        }
    }
}

impl fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local_only" | "local" => Ok(Self::Local),
            "remote_only" | "remote" => Ok(Self::Remote),
            "ci" => Ok(Self::Ci),
            other => Err(ValidationError::new(
                "strategy",
                format!("unknown strategy '{other}' (expected local_only, remote_only or ci)"),
            )),
        }
    }
}

/// Pick a strategy: an explicit override wins, otherwise build locally unless
/// the target differs from the host.
pub fn determine_strategy(
    explicit: Option<&str>,
    target: Option<TargetArch>,
    host: TargetArch,
) -> Result<BuildStrategy, ValidationError> {
    if let Some(explicit) = explicit {
        return explicit.parse();
    }
    Ok(match target {
        Some(target) if target != host => BuildStrategy::Remote,
        _ => BuildStrategy::Local,
    })
}

/// What to build.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub request: BuildRequest,
    /// Source tree for local and CI builds.
    pub source: PathBuf,
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutcome {
    /// Strategy that produced the artifacts.
    pub strategy: BuildStrategy,
    pub artifacts: Vec<PathBuf>,
    /// Remote build id, for remote builds.
    pub build_id: Option<String>,
    /// Set when this outcome is a retry after another strategy failed.
    pub fallback_from: Option<BuildStrategy>,
    pub fallback_reason: Option<String>,
}

impl BuildOutcome {
    fn new(strategy: BuildStrategy, artifacts: Vec<PathBuf>) -> Self {
        Self {
            strategy,
            artifacts,
            build_id: None,
            fallback_from: None,
            fallback_reason: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_from.is_some()
    }
}

/// Runs a build with the chosen strategy.
pub struct StrategySelector<E, C = HttpCoordinator> {
    local: Option<E>,
    ci: Option<E>,
    remote: RemoteBuildClient<C>,
    allow_fallback: bool,
}

impl<E: BuildExecutor, C: CoordinatorApi> StrategySelector<E, C> {
    pub fn new(remote: RemoteBuildClient<C>) -> Self {
        Self {
            local: None,
            ci: None,
            remote,
            allow_fallback: true,
        }
    }

    pub fn with_local(mut self, executor: E) -> Self {
        self.local = Some(executor);
        self
    }

    pub fn with_ci(mut self, executor: E) -> Self {
        self.ci = Some(executor);
        self
    }

    pub fn allow_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }

    pub fn remote(&self) -> &RemoteBuildClient<C> {
        &self.remote
    }

    /// Run `job` with `strategy`.
    ///
    /// A local failure is retried exactly once remotely when fallback is
    /// allowed and the coordinator answers its health check. Remote and CI
    /// failures are returned as-is.
    pub async fn execute(&self, strategy: BuildStrategy, job: &BuildJob) -> Result<BuildOutcome, StepError> {
        let local_err = match strategy {
            BuildStrategy::Remote => return self.run_remote(job).await,
            BuildStrategy::Ci => return self.run_ci(job).await,
            BuildStrategy::Local => match self.run_local(job).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            },
        };

        if !self.allow_fallback {
            return Err(local_err);
        }
        if let Err(e) = self.remote.api().health().await {
            info!("Local build failed and coordinator is not reachable ({}), not falling back", e);
            return Err(local_err);
        }

        warn!("Local build failed, falling back to remote build: {}", local_err);
        let mut outcome = self.run_remote(job).await?;
        outcome.fallback_from = Some(BuildStrategy::Local);
        outcome.fallback_reason = Some(local_err.to_string());
        Ok(outcome)
    }

    async fn run_local(&self, job: &BuildJob) -> Result<BuildOutcome, StepError> {
        let executor = self.local.as_ref().ok_or_else(|| {
            StepError::new(BuildStep::LocalCompile, StrategyError::NotConfigured(BuildStrategy::Local))
        })?;
        let artifacts = executor
            .compile(job.request.version(), &job.source, job.request.target_arch())
            .await
            .map_err(|e| StepError::new(BuildStep::LocalCompile, StrategyError::Local(e)))?;
        Ok(BuildOutcome::new(BuildStrategy::Local, artifacts))
    }

    async fn run_ci(&self, job: &BuildJob) -> Result<BuildOutcome, StepError> {
        let executor = self.ci.as_ref().ok_or_else(|| {
            StepError::new(BuildStep::CiBuild, StrategyError::NotConfigured(BuildStrategy::Ci))
        })?;
        let artifacts = executor
            .compile(job.request.version(), &job.source, job.request.target_arch())
            .await
            .map_err(|e| StepError::new(BuildStep::CiBuild, StrategyError::Ci(e)))?;
        Ok(BuildOutcome::new(BuildStrategy::Ci, artifacts))
    }

    async fn run_remote(&self, job: &BuildJob) -> Result<BuildOutcome, StepError> {
        let artifact = self.remote.build(&job.request).await?;
        let mut outcome = BuildOutcome::new(BuildStrategy::Remote, vec![artifact.path]);
        outcome.build_id = Some(artifact.build_id);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rbc_common::{Cpu, Os};

    const LINUX: TargetArch = TargetArch::new(Os::Linux, Cpu::X64);
    const MAC: TargetArch = TargetArch::new(Os::Darwin, Cpu::Arm64);

    #[test]
    fn default_strategy_follows_target() {
        assert_eq!(determine_strategy(None, None, LINUX), Ok(BuildStrategy::Local));
        assert_eq!(determine_strategy(None, Some(LINUX), LINUX), Ok(BuildStrategy::Local));
        assert_eq!(determine_strategy(None, Some(MAC), LINUX), Ok(BuildStrategy::Remote));
    }

    #[test]
    fn explicit_strategy_wins() {
        assert_eq!(determine_strategy(Some("ci"), Some(MAC), LINUX), Ok(BuildStrategy::Ci));
        assert_eq!(
            determine_strategy(Some("local_only"), Some(MAC), LINUX),
            Ok(BuildStrategy::Local)
        );
        assert_eq!(
            determine_strategy(Some("remote_only"), None, LINUX),
            Ok(BuildStrategy::Remote)
        );
    }

    #[test]
    fn strategy_aliases_and_invalid_values() {
        assert_eq!("Local".parse::<BuildStrategy>(), Ok(BuildStrategy::Local));
        assert_eq!("remote".parse::<BuildStrategy>(), Ok(BuildStrategy::Remote));
        let err = determine_strategy(Some("fastest"), None, LINUX).unwrap_err();
        assert_eq!(err.field, "strategy");
        assert_eq!(err.code().code_string(), "RBC-E305");
    }

    #[test]
    fn strategy_display_round_trips() {
        for strategy in [BuildStrategy::Local, BuildStrategy::Remote, BuildStrategy::Ci] {
            assert_eq!(strategy.to_string().parse::<BuildStrategy>(), Ok(strategy));
        }
    }

    fn arch() -> impl Strategy<Value = TargetArch> {
        (
            prop_oneof![Just(Os::Linux), Just(Os::Darwin), Just(Os::Windows)],
            prop_oneof![Just(Cpu::X64), Just(Cpu::Arm64)],
        )
            .prop_map(|(os, cpu)| TargetArch::new(os, cpu))
    }

    proptest! {
        #[test]
        fn remote_exactly_when_target_differs(target in arch(), host in arch()) {
            let strategy = determine_strategy(None, Some(target), host).unwrap();
            prop_assert_eq!(strategy == BuildStrategy::Remote, target != host);
        }
    }
}
