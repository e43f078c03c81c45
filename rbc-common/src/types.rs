//! Common types used across rbc components.

use crate::request::BuildRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier for a build node in the fleet.
///
/// Supplied by the agent at registration time, never generated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Status of a build node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Accepting jobs.
    #[default]
    Available,
    /// Reported busy by the agent itself.
    Busy,
    /// Taken out of rotation by an operator.
    Maintenance,
    /// Heartbeat expired. Only a fresh heartbeat brings it back.
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Busy => write!(f, "busy"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Rolling system aggregates reported by a node's heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Load average as reported by the agent.
    #[serde(default)]
    pub load: f64,
    /// Memory utilization, 0.0-1.0.
    #[serde(default)]
    pub memory: f64,
    /// Disk utilization, 0.0-1.0.
    #[serde(default)]
    pub disk: f64,
}

/// A registered build agent and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildNode {
    pub id: NodeId,
    /// Architecture tag, e.g. `linux-x64`.
    pub architecture: String,
    /// Base URL the dispatcher forwards jobs to.
    pub endpoint: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent: u32,
    pub status: NodeStatus,
    pub current_jobs: u32,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub total_builds: u64,
    pub successful_builds: u64,
    /// Fraction of completed builds that succeeded, in [0, 1].
    pub success_rate: f64,
    /// Mean wall-clock build duration in seconds.
    pub average_build_time_secs: f64,
}

impl BuildNode {
    /// Whether another job fits under `max_concurrent`.
    pub fn has_capacity(&self) -> bool {
        self.current_jobs < self.max_concurrent
    }

    /// Whether the node passes admission control right now.
    pub fn is_accepting(&self) -> bool {
        self.status == NodeStatus::Available && self.has_capacity()
    }

    /// Fraction of slots in use, in [0, 1].
    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 1.0;
        }
        (f64::from(self.current_jobs) / f64::from(self.max_concurrent)).min(1.0)
    }

    /// Whether the node offers every capability in `required`.
    pub fn supports(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// A node together with its heartbeat stats, as exposed by snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: BuildNode,
    pub stats: NodeStats,
}

/// Registration payload sent by an agent.
///
/// Every field is optional on the wire so the registry can report all
/// missing fields at once instead of failing on the first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistration {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub max_concurrent: Option<u32>,
}

/// Periodic status report from an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub current_jobs: Option<u32>,
    #[serde(default)]
    pub stats: Option<NodeStats>,
}

/// Constraints a node must satisfy to be selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRequirements {
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl SelectionRequirements {
    pub fn with_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

/// A job that has been handed to a node and not yet completed.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveJob {
    pub job_id: String,
    pub node_id: NodeId,
    pub request: BuildRequest,
    pub started_at: DateTime<Utc>,
}

/// Completion notice for a dispatched job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub job_id: String,
    pub success: bool,
}
