//! Shared types and utilities for the Remote Build Coordinator.
//!
//! Used by the coordinator daemon (`rbcd`) and the build client (`rbc`):
//! the build-node data model, build requests and their content hash, target
//! architecture parsing, the coordinator wire protocol, configuration, and
//! the error catalog.

pub mod arch;
pub mod config;
pub mod errors;
pub mod plugins;
pub mod protocol;
pub mod request;
pub mod types;
pub mod util;

pub use arch::{Cpu, Os, TargetArch, canonical_architecture};
pub use config::{ClientConfig, ConfigError, CoordinatorConfig, EnvError, EnvParser};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, ValidationError};
pub use plugins::{Plugin, PluginList, PluginSpec};
pub use protocol::{
    ArchitecturesResponse, BuildState, BuildStatusResponse, ConflictResponse, DispatchEnvelope,
    SubmitBuildBody, SubmitResponse,
};
pub use request::{BuildRequest, BuildRequestBuilder};
pub use types::{
    ActiveJob, BuildNode, HeartbeatPayload, JobCompletion, NodeId, NodeRegistration, NodeStats,
    NodeStatus, NodeView, SelectionRequirements,
};
pub use util::content_hash;
