//! Registry state machine.
//!
//! Plain data plus the transitions the actor applies one command at a time.
//! Every transition takes the current time explicitly.

use chrono::{DateTime, TimeDelta, Utc};
use rbc_common::{
    ActiveJob, BuildNode, BuildRequest, ErrorCode, HeartbeatPayload, NodeId, NodeRegistration,
    NodeStats, NodeStatus, NodeView, canonical_architecture,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default concurrency when a registration does not say.
pub const DEFAULT_MAX_CONCURRENT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("node registration is missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("node {0} is not registered")]
    NodeNotFound(NodeId),

    #[error("node {node_id} is not accepting jobs ({status}, {current_jobs}/{max_concurrent} slots used)")]
    NodeBusy {
        node_id: NodeId,
        status: NodeStatus,
        current_jobs: u32,
        max_concurrent: u32,
    },

    #[error("node registry is not running")]
    Unavailable,
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingFields { .. } => ErrorCode::NodeMissingFields,
            Self::InvalidField { .. } => ErrorCode::ConfigValidationError,
            Self::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Self::NodeBusy { .. } => ErrorCode::NodeBusy,
            Self::Unavailable => ErrorCode::RegistryUnavailable,
        }
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub node_id: NodeId,
    /// A node with the same id was replaced.
    pub replaced: bool,
    /// Active jobs dropped because of the replacement.
    pub dropped_jobs: usize,
}

/// Accounting applied for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedJob {
    pub job_id: String,
    pub node_id: NodeId,
    pub success: bool,
    pub duration_secs: f64,
}

#[derive(Debug, Default)]
pub struct RegistryState {
    nodes: HashMap<NodeId, BuildNode>,
    stats: HashMap<NodeId, NodeStats>,
    jobs: HashMap<String, ActiveJob>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        registration: NodeRegistration,
        now: DateTime<Utc>,
    ) -> Result<Registration, RegistryError> {
        let id = non_blank(registration.id);
        let architecture = non_blank(registration.architecture);
        let endpoint = non_blank(registration.endpoint);

        let mut missing = Vec::new();
        if id.is_none() {
            missing.push("id");
        }
        if architecture.is_none() {
            missing.push("architecture");
        }
        if endpoint.is_none() {
            missing.push("endpoint");
        }
        if registration.capabilities.is_none() {
            missing.push("capabilities");
        }
        let (Some(id), Some(architecture), Some(endpoint), Some(capabilities)) =
            (id, architecture, endpoint, registration.capabilities)
        else {
            return Err(RegistryError::MissingFields { fields: missing });
        };

        let max_concurrent = registration.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT);
        if max_concurrent == 0 {
            return Err(RegistryError::InvalidField {
                field: "max_concurrent",
                reason: "must be at least 1".to_string(),
            });
        }

        let node_id = NodeId::new(id);
        let capabilities: BTreeSet<String> = capabilities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let node = BuildNode {
            id: node_id.clone(),
            architecture: canonical_architecture(&architecture),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            capabilities,
            max_concurrent,
            status: NodeStatus::Available,
            current_jobs: 0,
            registered_at: now,
            last_heartbeat: now,
            total_builds: 0,
            successful_builds: 0,
            success_rate: 1.0,
            average_build_time_secs: 0.0,
        };

        let replaced = self.nodes.insert(node_id.clone(), node).is_some();
        self.stats.insert(node_id.clone(), NodeStats::default());
        let dropped_jobs = if replaced {
            let dropped = self.drop_jobs_for(&node_id);
            info!(
                node_id = %node_id,
                dropped_jobs = dropped,
                "Node re-registered, previous record replaced"
            );
            dropped
        } else {
            info!(node_id = %node_id, "Node registered");
            0
        };

        Ok(Registration {
            node_id,
            replaced,
            dropped_jobs,
        })
    }

    /// Apply a heartbeat. Returns `false` for unknown nodes.
    pub fn heartbeat(
        &mut self,
        node_id: &NodeId,
        payload: HeartbeatPayload,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(node_id) else {
            warn!(node_id = %node_id, "Heartbeat from unknown node ignored");
            return false;
        };

        node.last_heartbeat = now;
        match payload.status {
            Some(status) => node.status = status,
            None if node.status == NodeStatus::Offline => {
                info!(node_id = %node_id, "Node back online");
                node.status = NodeStatus::Available;
            }
            None => {}
        }
        if let Some(current_jobs) = payload.current_jobs {
            if current_jobs > node.max_concurrent {
                warn!(
                    node_id = %node_id,
                    reported = current_jobs,
                    max_concurrent = node.max_concurrent,
                    "Reported job count exceeds capacity, clamping"
                );
            }
            node.current_jobs = current_jobs.min(node.max_concurrent);
        }
        if let Some(stats) = payload.stats {
            self.stats.insert(node_id.clone(), stats);
        }
        debug!(node_id = %node_id, status = %node.status, "Heartbeat");
        true
    }

    /// Remove a node. Returns the number of active jobs dropped with it.
    pub fn deregister(&mut self, node_id: &NodeId) -> Result<usize, RegistryError> {
        if self.nodes.remove(node_id).is_none() {
            return Err(RegistryError::NodeNotFound(node_id.clone()));
        }
        self.stats.remove(node_id);
        let dropped = self.drop_jobs_for(node_id);
        info!(node_id = %node_id, dropped_jobs = dropped, "Node deregistered");
        Ok(dropped)
    }

    /// Admission check, slot increment and job record in one step.
    ///
    /// Returns the node as it stands after the reservation.
    pub fn reserve(
        &mut self,
        node_id: &NodeId,
        job_id: String,
        request: BuildRequest,
        now: DateTime<Utc>,
    ) -> Result<BuildNode, RegistryError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NodeNotFound(node_id.clone()))?;
        if !node.is_accepting() {
            return Err(RegistryError::NodeBusy {
                node_id: node_id.clone(),
                status: node.status,
                current_jobs: node.current_jobs,
                max_concurrent: node.max_concurrent,
            });
        }

        node.current_jobs += 1;
        let snapshot = node.clone();
        self.jobs.insert(
            job_id.clone(),
            ActiveJob {
                job_id,
                node_id: node_id.clone(),
                request,
                started_at: now,
            },
        );
        Ok(snapshot)
    }

    /// Undo a reservation whose forward failed. No statistics are recorded.
    pub fn release(&mut self, job_id: &str) -> bool {
        let Some(job) = self.jobs.remove(job_id) else {
            return false;
        };
        if let Some(node) = self.nodes.get_mut(&job.node_id) {
            node.current_jobs = node.current_jobs.saturating_sub(1);
        }
        debug!(job_id, node_id = %job.node_id, "Reservation released");
        true
    }

    /// Fold a completion notice into the owning node's rolling statistics.
    ///
    /// Unknown job ids are ignored, so duplicate or late notices are harmless.
    pub fn complete(
        &mut self,
        job_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Option<CompletedJob> {
        let Some(job) = self.jobs.remove(job_id) else {
            warn!(job_id, "Completion for unknown job ignored");
            return None;
        };

        let duration_secs = (now - job.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();

        match self.nodes.get_mut(&job.node_id) {
            Some(node) => {
                let total = node.total_builds as f64;
                node.average_build_time_secs =
                    (node.average_build_time_secs * total + duration_secs) / (total + 1.0);
                node.total_builds += 1;
                if success {
                    node.successful_builds += 1;
                }
                node.success_rate = node.successful_builds as f64 / node.total_builds as f64;
                node.current_jobs = node.current_jobs.saturating_sub(1);
                info!(
                    job_id,
                    node_id = %job.node_id,
                    success,
                    duration_secs,
                    success_rate = node.success_rate,
                    "Job completed"
                );
            }
            None => warn!(job_id, node_id = %job.node_id, "Completed job's node is gone"),
        }

        Some(CompletedJob {
            job_id: job.job_id,
            node_id: job.node_id,
            success,
            duration_secs,
        })
    }

    /// Mark nodes whose heartbeat is older than `timeout` offline.
    ///
    /// Returns the ids demoted by this sweep, sorted. Never revives a node.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<NodeId> {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let mut demoted: Vec<NodeId> = self
            .nodes
            .values_mut()
            .filter(|node| node.status != NodeStatus::Offline)
            .filter(|node| now - node.last_heartbeat > timeout)
            .map(|node| {
                node.status = NodeStatus::Offline;
                node.id.clone()
            })
            .collect();
        demoted.sort();
        demoted
    }

    pub fn get(&self, node_id: &NodeId) -> Option<NodeView> {
        self.nodes.get(node_id).map(|node| self.view(node))
    }

    /// All nodes with their stats, ordered by id.
    pub fn snapshot(&self) -> Vec<NodeView> {
        let mut views: Vec<NodeView> = self.nodes.values().map(|node| self.view(node)).collect();
        views.sort_by(|a, b| a.node.id.cmp(&b.node.id));
        views
    }

    /// In-flight jobs, oldest first.
    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        let mut jobs: Vec<ActiveJob> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    /// Distinct registered architecture tags, sorted.
    pub fn architectures(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.nodes.values().map(|n| n.architecture.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    fn view(&self, node: &BuildNode) -> NodeView {
        NodeView {
            node: node.clone(),
            stats: self.stats.get(&node.id).copied().unwrap_or_default(),
        }
    }

    fn drop_jobs_for(&mut self, node_id: &NodeId) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| &job.node_id != node_id);
        before - self.jobs.len()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
