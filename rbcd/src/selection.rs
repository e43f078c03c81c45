//! Node selection.
//!
//! Filters registry snapshots down to eligible nodes and ranks them by a
//! weighted combination of load headroom and historical success rate.

use rbc_common::{BuildNode, ErrorCode, NodeId, NodeView, SelectionRequirements, canonical_architecture};
use std::cmp::Ordering;
use thiserror::Error;

/// Weight of free capacity in the score.
pub const LOAD_WEIGHT: f64 = 0.6;
/// Weight of historical success rate in the score.
pub const RELIABILITY_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no available node for {architecture}{}", format_capabilities(.capabilities))]
pub struct NoAvailableNodes {
    pub architecture: String,
    pub capabilities: Vec<String>,
}

impl NoAvailableNodes {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::NoAvailableNodes
    }
}

fn format_capabilities(capabilities: &[String]) -> String {
    if capabilities.is_empty() {
        String::new()
    } else {
        format!(" with capabilities [{}]", capabilities.join(", "))
    }
}

/// `0.6 * (1 - current_jobs / max_concurrent) + 0.4 * success_rate`
pub fn score(node: &BuildNode) -> f64 {
    LOAD_WEIGHT * (1.0 - node.load_ratio()) + RELIABILITY_WEIGHT * node.success_rate
}

/// Whether `node` may receive a job for `architecture` under `requirements`.
pub fn is_eligible(node: &BuildNode, architecture: &str, requirements: &SelectionRequirements) -> bool {
    node.architecture == architecture && node.is_accepting() && node.supports(&requirements.capabilities)
}

/// Pick the best eligible node.
///
/// Ties on score go to the node with fewer running jobs, then to the
/// smallest id, so the choice is deterministic.
pub fn select(
    nodes: &[NodeView],
    architecture: &str,
    requirements: &SelectionRequirements,
) -> Result<NodeId, NoAvailableNodes> {
    let architecture = canonical_architecture(architecture);
    nodes
        .iter()
        .map(|view| &view.node)
        .filter(|node| is_eligible(node, &architecture, requirements))
        .max_by(|a, b| rank(a, b))
        .map(|node| node.id.clone())
        .ok_or_else(|| NoAvailableNodes {
            architecture,
            capabilities: requirements.capabilities.iter().cloned().collect(),
        })
}

/// Ordering where the preferred node compares greater.
fn rank(a: &BuildNode, b: &BuildNode) -> Ordering {
    score(a)
        .total_cmp(&score(b))
        .then_with(|| b.current_jobs.cmp(&a.current_jobs))
        .then_with(|| b.id.cmp(&a.id))
}
