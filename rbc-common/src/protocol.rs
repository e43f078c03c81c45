//! Coordinator wire protocol.
//!
//! JSON bodies exchanged between the build client and a coordinator, plus
//! the envelope the dispatcher forwards to a build node.

use crate::arch::TargetArch;
use crate::plugins::Plugin;
use crate::request::BuildRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /builds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitBuildBody {
    pub version: String,
    pub target_arch: TargetArch,
    pub plugins: Vec<Plugin>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub source_checksum: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl From<&BuildRequest> for SubmitBuildBody {
    fn from(request: &BuildRequest) -> Self {
        Self {
            version: request.version().to_string(),
            target_arch: request.target_arch(),
            plugins: request.plugins().to_vec(),
            config: request.config().clone(),
            source_checksum: request.source_checksum().map(String::from),
            priority: request.priority(),
            metadata: request.metadata().clone(),
        }
    }
}

/// `201 Created` response to a build submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub build_id: String,
    #[serde(default)]
    pub queue_position: Option<u32>,
    /// Estimated seconds until the build completes.
    #[serde(default)]
    pub estimated_time: Option<f64>,
}

/// `409 Conflict` response: an identical build already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResponse {
    pub build_id: String,
}

/// Lifecycle state reported by `GET /builds/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Response of `GET /builds/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatusResponse {
    pub status: BuildState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl BuildStatusResponse {
    pub fn new(status: BuildState) -> Self {
        Self {
            status,
            progress: None,
            error: None,
            binary_url: None,
            build_time_seconds: None,
            node_id: None,
        }
    }
}

/// Response of `GET /architectures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitecturesResponse {
    pub architectures: Vec<String>,
}

/// Body the dispatcher posts to `{endpoint}/build` on a node.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEnvelope<'a> {
    pub job_id: &'a str,
    pub request: &'a BuildRequest,
}
