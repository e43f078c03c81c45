//! Build client for the Remote Build Coordinator.
//!
//! Chooses how to build (locally, remotely through the coordinator, or via
//! CI), runs the build, and retrieves remote artifacts.

pub mod error;
pub mod executor;
pub mod remote;
pub mod strategy;

pub use error::{BuildStep, ClientError, ExecutorError, StepError, StrategyError};
pub use executor::{BuildExecutor, CommandExecutor};
pub use remote::{
    CoordinatorApi, HttpCoordinator, PollSettings, RemoteArtifact, RemoteBuildClient,
    RemoteSettings, SubmitOutcome,
};
pub use strategy::{BuildJob, BuildOutcome, BuildStrategy, StrategySelector, determine_strategy};
