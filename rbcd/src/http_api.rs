//! HTTP API of the coordinator daemon.
//!
//! Provides:
//! - `/health` - Basic daemon health check
//! - `/ready` - Readiness probe (any node selectable)
//! - `/nodes` - Registry snapshot and node registration
//! - `/nodes/{id}/heartbeat`, `DELETE /nodes/{id}` - Node lifecycle
//! - `/architectures` - Registered architectures
//! - `/queue/status` - In-flight jobs and per-node load
//! - `/jobs` - Select a node and dispatch a build
//! - `/events` - Recent registry and dispatch events

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use rbc_common::{
    ArchitecturesResponse, BuildRequest, ErrorCode, HeartbeatPayload, NodeId, NodeRegistration,
    NodeStatus, PluginList, SelectionRequirements, TargetArch, ValidationError,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::dispatch::{DispatchError, HttpNodeTransport, JobDispatcher, NodeTransport};
use crate::events::{EventBus, EventKind};
use crate::registry::{NodeRegistry, RegistryError};

/// Shared state for HTTP handlers.
pub struct HttpState<T = HttpNodeTransport> {
    pub registry: NodeRegistry,
    pub dispatcher: JobDispatcher<T>,
    pub events: EventBus,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon start time.
    pub started_at: Instant,
    /// Daemon PID.
    pub pid: u32,
}

type SharedState<T> = State<Arc<HttpState<T>>>;

/// Create the HTTP router.
pub fn create_router<T: NodeTransport>(state: HttpState<T>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<T>))
        .route("/ready", get(ready_handler::<T>))
        .route("/nodes", get(list_nodes::<T>).post(register_node::<T>))
        .route("/nodes/{id}", delete(deregister_node::<T>))
        .route("/nodes/{id}/heartbeat", post(heartbeat_handler::<T>))
        .route("/architectures", get(architectures_handler::<T>))
        .route("/queue/status", get(queue_status_handler::<T>))
        .route("/jobs", post(submit_job::<T>))
        .route("/events", get(events_handler::<T>))
        .with_state(Arc::new(state))
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<T: NodeTransport>(
    listener: tokio::net::TcpListener,
    state: HttpState<T>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Error body: `{"error": ..., "code": "RBC-Exxx"}` plus optional details.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "code": self.code.code_string(),
        });
        if let (Some(Value::Object(details)), Some(obj)) = (self.details, body.as_object_mut()) {
            obj.extend(details);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::MissingFields { .. } | RegistryError::InvalidField { .. } => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::NodeBusy { .. } => StatusCode::CONFLICT,
            RegistryError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let mut api = Self::new(status, err.code(), err.to_string());
        if let RegistryError::MissingFields { fields } = &err {
            api.details = Some(json!({ "missing_fields": fields }));
        }
        api
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Registry(inner) => inner.into(),
            DispatchError::NoAvailableNodes(ref inner) => {
                let mut api = Self::new(StatusCode::SERVICE_UNAVAILABLE, err.code(), err.to_string());
                api.details = Some(json!({
                    "architecture": inner.architecture,
                    "capabilities": inner.capabilities,
                }));
                api
            }
            DispatchError::Forward { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, err.code(), err.to_string())
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.code(), err.to_string())
    }
}

/// Handler for `/health`.
async fn health_handler<T: NodeTransport>(State(state): SharedState<T>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Handler for `/ready`: 200 if any node can take a job, 503 otherwise.
async fn ready_handler<T: NodeTransport>(State(state): SharedState<T>) -> Result<Response, ApiError> {
    let nodes = state.registry.snapshot().await?;
    let accepting: Vec<_> = nodes.iter().filter(|v| v.node.is_accepting()).collect();
    let total_slots: u32 = accepting
        .iter()
        .map(|v| v.node.max_concurrent - v.node.current_jobs)
        .sum();

    let response = if accepting.is_empty() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "reason": "no_nodes_available",
                "available_nodes": 0,
                "total_available_slots": 0,
            })),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "available_nodes": accepting.len(),
                "total_available_slots": total_slots,
            })),
        )
    };
    Ok(response.into_response())
}

async fn list_nodes<T: NodeTransport>(State(state): SharedState<T>) -> Result<Response, ApiError> {
    let nodes = state.registry.snapshot().await?;
    Ok(Json(json!({ "nodes": nodes })).into_response())
}

async fn register_node<T: NodeTransport>(
    State(state): SharedState<T>,
    Json(registration): Json<NodeRegistration>,
) -> Result<Response, ApiError> {
    let registered = state.registry.register(registration).await?;
    state.events.emit(
        EventKind::NodeRegistered,
        &json!({
            "node_id": registered.node_id,
            "replaced": registered.replaced,
        }),
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "node_id": registered.node_id,
            "replaced": registered.replaced,
            "dropped_jobs": registered.dropped_jobs,
        })),
    )
        .into_response())
}

async fn heartbeat_handler<T: NodeTransport>(
    State(state): SharedState<T>,
    Path(id): Path<String>,
    Json(payload): Json<HeartbeatPayload>,
) -> Result<Response, ApiError> {
    let known = state.registry.heartbeat(NodeId::new(id), payload).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "acknowledged": true, "known": known }))).into_response())
}

async fn deregister_node<T: NodeTransport>(
    State(state): SharedState<T>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let node_id = NodeId::new(id);
    let dropped = state.registry.deregister(node_id.clone()).await?;
    state.events.emit(
        EventKind::NodeDeregistered,
        &json!({ "node_id": node_id, "dropped_jobs": dropped }),
    );
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn architectures_handler<T: NodeTransport>(
    State(state): SharedState<T>,
) -> Result<Json<ArchitecturesResponse>, ApiError> {
    let architectures = state.registry.architectures().await?;
    Ok(Json(ArchitecturesResponse { architectures }))
}

async fn queue_status_handler<T: NodeTransport>(
    State(state): SharedState<T>,
) -> Result<Response, ApiError> {
    let jobs = state.registry.active_jobs().await?;
    let nodes = state.registry.snapshot().await?;

    let jobs: Vec<Value> = jobs
        .iter()
        .map(|job| {
            json!({
                "job_id": job.job_id,
                "node_id": job.node_id,
                "version": job.request.version(),
                "target_arch": job.request.target_arch(),
                "content_hash": job.request.content_hash(),
                "started_at": job.started_at,
            })
        })
        .collect();
    let available = nodes
        .iter()
        .filter(|v| v.node.status == NodeStatus::Available)
        .count();
    let nodes: Vec<Value> = nodes
        .iter()
        .map(|v| {
            json!({
                "id": v.node.id,
                "architecture": v.node.architecture,
                "status": v.node.status,
                "current_jobs": v.node.current_jobs,
                "max_concurrent": v.node.max_concurrent,
            })
        })
        .collect();

    Ok(Json(json!({
        "active_jobs": jobs.len(),
        "available_nodes": available,
        "jobs": jobs,
        "nodes": nodes,
    }))
    .into_response())
}

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct JobSubmission {
    pub version: String,
    pub target_arch: String,
    #[serde(default)]
    pub plugins: PluginList,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub source_checksum: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Capabilities the chosen node must offer.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl JobSubmission {
    fn into_parts(self) -> Result<(BuildRequest, SelectionRequirements), ValidationError> {
        let target: TargetArch = self.target_arch.parse()?;
        let mut builder = BuildRequest::builder(self.version, target)
            .plugins(self.plugins)
            .config(self.config)
            .priority(self.priority);
        if let Some(checksum) = self.source_checksum {
            builder = builder.source_checksum(checksum);
        }
        for (key, value) in self.metadata {
            builder = builder.metadata(key, value);
        }
        let requirements = SelectionRequirements::with_capabilities(self.capabilities);
        Ok((builder.build()?, requirements))
    }
}

async fn submit_job<T: NodeTransport>(
    State(state): SharedState<T>,
    Json(submission): Json<JobSubmission>,
) -> Result<Response, ApiError> {
    let (request, requirements) = submission.into_parts()?;
    debug!(
        target = %request.target_arch(),
        content_hash = request.content_hash(),
        "Job submission"
    );
    let receipt = state.dispatcher.dispatch(request, &requirements).await?;
    Ok((StatusCode::CREATED, Json(receipt)).into_response())
}

const DEFAULT_EVENT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn events_handler<T: NodeTransport>(
    State(state): SharedState<T>,
    Query(query): Query<EventsQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(state.events.capacity());
    Json(json!({ "events": state.events.recent(limit) }))
}
