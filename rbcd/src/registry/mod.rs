//! Node registry.
//!
//! A single task owns all node, stats and job state and applies commands one
//! at a time; [`NodeRegistry`] is the cloneable handle used to send them.

mod state;

pub use state::{CompletedJob, Registration, RegistryError};
use state::RegistryState;

use chrono::{DateTime, Utc};
use rbc_common::{ActiveJob, BuildNode, BuildRequest, HeartbeatPayload, NodeId, NodeRegistration, NodeView};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

const COMMAND_BUFFER: usize = 1024;

/// Source of the current time for state transitions.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

enum RegistryCommand {
    Register {
        registration: NodeRegistration,
        reply: oneshot::Sender<Result<Registration, RegistryError>>,
    },
    Heartbeat {
        node_id: NodeId,
        payload: HeartbeatPayload,
        reply: oneshot::Sender<bool>,
    },
    Deregister {
        node_id: NodeId,
        reply: oneshot::Sender<Result<usize, RegistryError>>,
    },
    Reserve {
        node_id: NodeId,
        job_id: String,
        request: Box<BuildRequest>,
        reply: oneshot::Sender<Result<BuildNode, RegistryError>>,
    },
    Release {
        job_id: String,
        reply: oneshot::Sender<bool>,
    },
    Complete {
        job_id: String,
        success: bool,
        reply: oneshot::Sender<Option<CompletedJob>>,
    },
    Sweep {
        timeout: Duration,
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<NodeView>>,
    },
    ActiveJobs {
        reply: oneshot::Sender<Vec<ActiveJob>>,
    },
    Architectures {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Handle to the registry task.
#[derive(Clone)]
pub struct NodeRegistry {
    tx: mpsc::Sender<RegistryCommand>,
}

impl NodeRegistry {
    /// Spawn the registry task using the wall clock.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        Self::spawn_with_clock(Arc::new(Utc::now))
    }

    /// Spawn the registry task with an injected clock.
    ///
    /// The task exits once every handle is dropped.
    pub fn spawn_with_clock(clock: Clock) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(run(RegistryState::new(), rx, clock));
        (Self { tx }, handle)
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> RegistryCommand,
    ) -> Result<R, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| RegistryError::Unavailable)?;
        rx.await.map_err(|_| RegistryError::Unavailable)
    }

    pub async fn register(&self, registration: NodeRegistration) -> Result<Registration, RegistryError> {
        self.request(|reply| RegistryCommand::Register { registration, reply })
            .await?
    }

    /// Returns `Ok(false)` when the node is unknown.
    pub async fn heartbeat(
        &self,
        node_id: NodeId,
        payload: HeartbeatPayload,
    ) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::Heartbeat {
            node_id,
            payload,
            reply,
        })
        .await
    }

    /// Returns the number of active jobs dropped with the node.
    pub async fn deregister(&self, node_id: NodeId) -> Result<usize, RegistryError> {
        self.request(|reply| RegistryCommand::Deregister { node_id, reply })
            .await?
    }

    pub async fn reserve(
        &self,
        node_id: NodeId,
        job_id: String,
        request: BuildRequest,
    ) -> Result<BuildNode, RegistryError> {
        self.request(|reply| RegistryCommand::Reserve {
            node_id,
            job_id,
            request: Box::new(request),
            reply,
        })
        .await?
    }

    pub async fn release(&self, job_id: String) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::Release { job_id, reply })
            .await
    }

    pub async fn complete(
        &self,
        job_id: String,
        success: bool,
    ) -> Result<Option<CompletedJob>, RegistryError> {
        self.request(|reply| RegistryCommand::Complete {
            job_id,
            success,
            reply,
        })
        .await
    }

    pub async fn sweep(&self, timeout: Duration) -> Result<Vec<NodeId>, RegistryError> {
        self.request(|reply| RegistryCommand::Sweep { timeout, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<Vec<NodeView>, RegistryError> {
        self.request(|reply| RegistryCommand::Snapshot { reply }).await
    }

    pub async fn active_jobs(&self) -> Result<Vec<ActiveJob>, RegistryError> {
        self.request(|reply| RegistryCommand::ActiveJobs { reply }).await
    }

    pub async fn architectures(&self) -> Result<Vec<String>, RegistryError> {
        self.request(|reply| RegistryCommand::Architectures { reply })
            .await
    }
}

async fn run(mut state: RegistryState, mut rx: mpsc::Receiver<RegistryCommand>, clock: Clock) {
    debug!("Node registry started");
    while let Some(command) = rx.recv().await {
        let now = clock();
        // A dropped reply receiver means the caller gave up; nothing to do.
        match command {
            RegistryCommand::Register { registration, reply } => {
                let _ = reply.send(state.register(registration, now));
            }
            RegistryCommand::Heartbeat {
                node_id,
                payload,
                reply,
            } => {
                let _ = reply.send(state.heartbeat(&node_id, payload, now));
            }
            RegistryCommand::Deregister { node_id, reply } => {
                let _ = reply.send(state.deregister(&node_id));
            }
            RegistryCommand::Reserve {
                node_id,
                job_id,
                request,
                reply,
            } => {
                let _ = reply.send(state.reserve(&node_id, job_id, *request, now));
            }
            RegistryCommand::Release { job_id, reply } => {
                let _ = reply.send(state.release(&job_id));
            }
            RegistryCommand::Complete {
                job_id,
                success,
                reply,
            } => {
                let _ = reply.send(state.complete(&job_id, success, now));
            }
            RegistryCommand::Sweep { timeout, reply } => {
                let _ = reply.send(state.sweep(now, timeout));
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
            RegistryCommand::ActiveJobs { reply } => {
                let _ = reply.send(state.active_jobs());
            }
            RegistryCommand::Architectures { reply } => {
                let _ = reply.send(state.architectures());
            }
        }
    }
    debug!("Node registry stopped");
}
