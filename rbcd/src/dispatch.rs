//! Job dispatch and completion accounting.
//!
//! A submission reserves a slot on the node inside the registry, forwards the
//! request to the node outside of it, and rolls the reservation back if the
//! forward fails.

use crate::events::{EventBus, EventKind};
use crate::registry::{CompletedJob, NodeRegistry, RegistryError};
use crate::selection::{self, NoAvailableNodes};
use rbc_common::{
    BuildNode, BuildRequest, DispatchEnvelope, ErrorCode, JobCompletion, NodeId,
    SelectionRequirements,
};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failure to hand a job to a node.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("node answered {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound channel from the coordinator to build nodes.
pub trait NodeTransport: Send + Sync + 'static {
    fn forward(
        &self,
        node: &BuildNode,
        envelope: &DispatchEnvelope<'_>,
    ) -> impl Future<Output = Result<(), ForwardError>> + Send;
}

/// Forwards jobs with `POST {endpoint}/build`.
#[derive(Clone)]
pub struct HttpNodeTransport {
    client: reqwest::Client,
}

impl HttpNodeTransport {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rbcd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ForwardError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl NodeTransport for HttpNodeTransport {
    async fn forward(
        &self,
        node: &BuildNode,
        envelope: &DispatchEnvelope<'_>,
    ) -> Result<(), ForwardError> {
        let url = format!("{}/build", node.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ForwardError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    NoAvailableNodes(#[from] NoAvailableNodes),

    #[error("forwarding job {job_id} to node {node_id} failed: {source}")]
    Forward {
        job_id: String,
        node_id: NodeId,
        #[source]
        source: ForwardError,
    },
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Registry(err) => err.code(),
            Self::NoAvailableNodes(err) => err.code(),
            Self::Forward { .. } => ErrorCode::NodeForwardFailed,
        }
    }
}

/// A job accepted by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub job_id: String,
    pub node_id: NodeId,
    pub endpoint: String,
}

pub struct JobDispatcher<T = HttpNodeTransport> {
    registry: NodeRegistry,
    transport: Arc<T>,
    events: EventBus,
}

impl<T> Clone for JobDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            transport: self.transport.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T: NodeTransport> JobDispatcher<T> {
    pub fn new(registry: NodeRegistry, transport: T, events: EventBus) -> Self {
        Self {
            registry,
            transport: Arc::new(transport),
            events,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Submit `request` to a specific node.
    ///
    /// A busy or unknown node is rejected without any state change.
    pub async fn submit(
        &self,
        node_id: &NodeId,
        request: BuildRequest,
    ) -> Result<DispatchReceipt, DispatchError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let node = self
            .registry
            .reserve(node_id.clone(), job_id.clone(), request.clone())
            .await?;

        let envelope = DispatchEnvelope {
            job_id: &job_id,
            request: &request,
        };
        match self.transport.forward(&node, &envelope).await {
            Ok(()) => {
                info!(
                    job_id = %job_id,
                    node_id = %node.id,
                    target = %request.target_arch(),
                    "Job dispatched"
                );
                let receipt = DispatchReceipt {
                    job_id,
                    node_id: node.id,
                    endpoint: node.endpoint,
                };
                self.events.emit(EventKind::JobDispatched, &receipt);
                Ok(receipt)
            }
            Err(source) => {
                warn!(job_id = %job_id, node_id = %node.id, "Forward failed: {}", source);
                if let Err(e) = self.registry.release(job_id.clone()).await {
                    error!(job_id = %job_id, "Failed to release reservation: {}", e);
                }
                self.events.emit(
                    EventKind::JobDispatchFailed,
                    &json!({
                        "job_id": job_id,
                        "node_id": node.id,
                        "reason": source.to_string(),
                    }),
                );
                Err(DispatchError::Forward {
                    job_id,
                    node_id: node.id,
                    source,
                })
            }
        }
    }

    /// Select the best node for the request's target and submit to it.
    pub async fn dispatch(
        &self,
        request: BuildRequest,
        requirements: &SelectionRequirements,
    ) -> Result<DispatchReceipt, DispatchError> {
        let nodes = self.registry.snapshot().await?;
        let target = request.target_arch().to_string();
        let node_id = selection::select(&nodes, &target, requirements)?;
        self.submit(&node_id, request).await
    }

    /// Apply a completion notice. Unknown jobs yield `Ok(None)`.
    pub async fn complete(
        &self,
        completion: JobCompletion,
    ) -> Result<Option<CompletedJob>, RegistryError> {
        let done = self
            .registry
            .complete(completion.job_id, completion.success)
            .await?;
        if let Some(job) = &done {
            self.events.emit(EventKind::JobCompleted, job);
        }
        Ok(done)
    }
}
