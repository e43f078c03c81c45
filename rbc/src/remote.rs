//! Remote build client.
//!
//! Submits a build request to the coordinator, polls until the build reaches
//! a terminal state, and downloads the resulting binary.

use crate::error::{BuildStep, ClientError, StepError};
use rbc_common::util::mask_secret;
use rbc_common::{
    ArchitecturesResponse, BuildRequest, BuildState, BuildStatusResponse, ClientConfig,
    ConflictResponse, SubmitBuildBody, SubmitResponse, TargetArch,
};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Operations the build client needs from a coordinator.
pub trait CoordinatorApi: Send + Sync {
    /// `POST /builds`. A `409` counts as success and yields the existing build.
    fn submit(
        &self,
        body: &SubmitBuildBody,
    ) -> impl Future<Output = Result<SubmitOutcome, ClientError>> + Send;

    /// `GET /builds/{id}`.
    fn status(
        &self,
        build_id: &str,
    ) -> impl Future<Output = Result<BuildStatusResponse, ClientError>> + Send;

    /// Stream `url` into `dest`, returning the number of bytes written.
    fn download(
        &self,
        url: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<u64, ClientError>> + Send;

    /// `GET /health`; succeeds when the coordinator is reachable.
    fn health(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn architectures(&self) -> impl Future<Output = Result<Vec<String>, ClientError>> + Send;

    fn queue_status(&self) -> impl Future<Output = Result<serde_json::Value, ClientError>> + Send;
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub build_id: String,
    /// True when the coordinator already had this build (`409`).
    pub reused: bool,
    pub queue_position: Option<u32>,
    pub estimated_time: Option<f64>,
}

/// Coordinator client over HTTP with bearer authentication.
#[derive(Clone)]
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl HttpCoordinator {
    /// Build a client from settings. Missing URL or key is reported on first use,
    /// before any request is sent.
    ///
    /// The client itself only bounds connecting and each read, so artifact
    /// downloads may take as long as they keep making progress. Coordinator
    /// API calls add a whole-request timeout on top.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let request_timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .read_timeout(request_timeout)
            .user_agent(concat!("rbc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Unreachable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config
                .coordinator_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone(),
            request_timeout,
        })
    }

    fn base_url(&self) -> Result<&str, ClientError> {
        self.base_url.as_deref().ok_or(ClientError::MissingConfiguration {
            field: "coordinator_url",
        })
    }

    fn api_key(&self) -> Result<&str, ClientError> {
        self.api_key
            .as_deref()
            .ok_or(ClientError::MissingConfiguration { field: "api_key" })
    }

    /// Absolute URLs are used as-is; anything else is relative to the coordinator.
    fn resolve(&self, url: &str) -> Result<String, ClientError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        Ok(format!("{}/{}", self.base_url()?, url.trim_start_matches('/')))
    }

    /// Whether `url` shares scheme, host and port with the coordinator.
    fn is_coordinator_origin(&self, url: &str) -> bool {
        let origin = |u: &str| reqwest::Url::parse(u).ok().map(|u| u.origin());
        match (self.base_url.as_deref().and_then(origin), origin(url)) {
            (Some(base), Some(target)) => base == target,
            _ => false,
        }
    }

    /// A coordinator API request, bounded by the request timeout.
    fn api_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, ClientError> {
        let url = self.resolve(path)?;
        let key = self.api_key()?;
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(key)
            .timeout(self.request_timeout))
    }

    /// An artifact fetch. The API key is only sent to the coordinator's own
    /// origin; other hosts (CDNs, presigned storage URLs) get a bare request.
    fn artifact_request(&self, url: &str) -> Result<reqwest::RequestBuilder, ClientError> {
        let url = self.resolve(url)?;
        let key = self.api_key()?;
        let request = self.client.get(url.as_str());
        if self.is_coordinator_origin(&url) {
            Ok(request.bearer_auth(key))
        } else {
            debug!(url = %url, "Artifact is hosted elsewhere, sending no credentials");
            Ok(request)
        }
    }
}

impl std::fmt::Debug for HttpCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCoordinator")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .finish()
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}

impl CoordinatorApi for HttpCoordinator {
    async fn submit(&self, body: &SubmitBuildBody) -> Result<SubmitOutcome, ClientError> {
        let response = self
            .api_request(reqwest::Method::POST, "/builds")?
            .json(body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            let conflict: ConflictResponse = response.json().await?;
            return Ok(SubmitOutcome {
                build_id: conflict.build_id,
                reused: true,
                queue_position: None,
                estimated_time: None,
            });
        }

        let created: SubmitResponse = error_for_status(response).await?.json().await?;
        Ok(SubmitOutcome {
            build_id: created.build_id,
            reused: false,
            queue_position: created.queue_position,
            estimated_time: created.estimated_time,
        })
    }

    async fn status(&self, build_id: &str) -> Result<BuildStatusResponse, ClientError> {
        let path = format!("/builds/{build_id}");
        let response = self.api_request(reqwest::Method::GET, &path)?.send().await?;
        Ok(error_for_status(response).await?.json().await?)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ClientError> {
        let mut response = error_for_status(self.artifact_request(url)?.send().await?).await?;

        let write_err = |source| ClientError::ArtifactWrite {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;
        Ok(written)
    }

    async fn health(&self) -> Result<(), ClientError> {
        let response = self.api_request(reqwest::Method::GET, "/health")?.send().await?;
        error_for_status(response).await.map(|_| ())
    }

    async fn architectures(&self) -> Result<Vec<String>, ClientError> {
        let response = self.api_request(reqwest::Method::GET, "/architectures")?.send().await?;
        let body: ArchitecturesResponse = error_for_status(response).await?.json().await?;
        Ok(body.architectures)
    }

    async fn queue_status(&self) -> Result<serde_json::Value, ClientError> {
        let response = self.api_request(reqwest::Method::GET, "/queue/status")?.send().await?;
        Ok(error_for_status(response).await?.json().await?)
    }
}

/// Poll cadence and deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub poll: PollSettings,
    pub output_dir: PathBuf,
    /// Artifacts are written to `{output_dir}/{artifact_name}-{target}`.
    pub artifact_name: String,
}

impl From<&ClientConfig> for RemoteSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            poll: PollSettings {
                interval: config.poll_interval(),
                timeout: config.poll_timeout(),
            },
            output_dir: config.output_dir.clone(),
            artifact_name: config.artifact_name.clone(),
        }
    }
}

/// A downloaded build result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteArtifact {
    pub build_id: String,
    pub content_hash: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub reused: bool,
    pub node_id: Option<String>,
    pub build_time_seconds: Option<f64>,
}

pub struct RemoteBuildClient<C = HttpCoordinator> {
    api: C,
    settings: RemoteSettings,
}

impl RemoteBuildClient<HttpCoordinator> {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::new(HttpCoordinator::new(config)?, RemoteSettings::from(config)))
    }
}

impl<C: CoordinatorApi> RemoteBuildClient<C> {
    pub fn new(api: C, settings: RemoteSettings) -> Self {
        Self { api, settings }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    /// Submit, wait, and download. Errors carry the step that failed.
    pub async fn build(&self, request: &BuildRequest) -> Result<RemoteArtifact, StepError> {
        let submitted = self
            .submit(request)
            .await
            .map_err(|e| StepError::new(BuildStep::Submit, e))?;
        let finished = self
            .wait_for_completion(&submitted.build_id)
            .await
            .map_err(|e| StepError::new(BuildStep::Poll, e))?;
        let (path, bytes) = self
            .retrieve(&submitted.build_id, &finished, request.target_arch())
            .await
            .map_err(|e| StepError::new(BuildStep::Retrieve, e))?;

        Ok(RemoteArtifact {
            build_id: submitted.build_id,
            content_hash: request.content_hash().to_string(),
            path,
            bytes,
            reused: submitted.reused,
            node_id: finished.node_id,
            build_time_seconds: finished.build_time_seconds,
        })
    }

    pub async fn submit(&self, request: &BuildRequest) -> Result<SubmitOutcome, ClientError> {
        let body = SubmitBuildBody::from(request);
        let outcome = self.api.submit(&body).await?;
        if outcome.reused {
            info!(
                build_id = %outcome.build_id,
                content_hash = request.content_hash(),
                "Coordinator already has this build, reusing it"
            );
        } else {
            info!(
                build_id = %outcome.build_id,
                content_hash = request.content_hash(),
                queue_position = ?outcome.queue_position,
                "Build submitted"
            );
        }
        Ok(outcome)
    }

    /// Poll until the build completes or fails.
    ///
    /// Query errors are logged and polling continues. Once the timeout has
    /// elapsed the loop is abandoned; the server-side build is not cancelled.
    pub async fn wait_for_completion(
        &self,
        build_id: &str,
    ) -> Result<BuildStatusResponse, ClientError> {
        let poll = self.settings.poll;
        let started = Instant::now();

        loop {
            match self.api.status(build_id).await {
                Ok(status) => match status.status {
                    BuildState::Completed => return Ok(status),
                    BuildState::Failed => {
                        return Err(ClientError::BuildFailed {
                            build_id: build_id.to_string(),
                            message: status
                                .error
                                .unwrap_or_else(|| "no error message from coordinator".to_string()),
                        });
                    }
                    state => debug!(build_id, %state, progress = ?status.progress, "Build in progress"),
                },
                Err(e) => warn!(build_id, "Status query failed, will retry: {}", e),
            }

            let elapsed = started.elapsed();
            if elapsed > poll.timeout {
                return Err(ClientError::Timeout {
                    build_id: build_id.to_string(),
                    elapsed,
                });
            }
            tokio::time::sleep(poll.interval).await;
        }
    }

    /// Download the finished binary and mark it executable.
    ///
    /// The body is streamed into a `.part` sibling and only renamed over the
    /// destination once it is complete and non-empty, so a failed download
    /// leaves any earlier artifact in place.
    pub async fn retrieve(
        &self,
        build_id: &str,
        status: &BuildStatusResponse,
        target: TargetArch,
    ) -> Result<(PathBuf, u64), ClientError> {
        let url = status
            .binary_url
            .as_deref()
            .ok_or_else(|| ClientError::MissingArtifactUrl {
                build_id: build_id.to_string(),
            })?;
        let file_name = target.artifact_file_name(&self.settings.artifact_name);
        let path = self.settings.output_dir.join(&file_name);
        let partial = self.settings.output_dir.join(format!("{file_name}.part"));

        let bytes = match self.api.download(url, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };
        if bytes == 0 {
            discard(&partial).await;
            return Err(ClientError::EmptyArtifact { path });
        }
        if let Err(e) = make_executable(&partial).await {
            discard(&partial).await;
            return Err(e);
        }
        if let Err(source) = tokio::fs::rename(&partial, &path).await {
            discard(&partial).await;
            return Err(ClientError::ArtifactWrite { path, source });
        }

        info!(build_id, path = %path.display(), bytes, "Artifact downloaded");
        Ok((path, bytes))
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove partial artifact: {}", e),
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), ClientError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|source| ClientError::Permissions {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), ClientError> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory coordinator with scripted status replies.
    pub struct ScriptedCoordinator {
        pub statuses: Mutex<VecDeque<Result<BuildStatusResponse, ClientError>>>,
        pub artifact: Vec<u8>,
        pub reachable: AtomicBool,
        pub submissions: AtomicUsize,
        pub polls: AtomicUsize,
    }

    impl ScriptedCoordinator {
        pub fn new(artifact: &[u8]) -> Self {
            Self {
                statuses: Mutex::new(VecDeque::new()),
                artifact: artifact.to_vec(),
                reachable: AtomicBool::new(true),
                submissions: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
            }
        }

        pub fn push_status(&self, status: Result<BuildStatusResponse, ClientError>) {
            self.statuses.lock().unwrap().push_back(status);
        }

        pub fn push_completed(&self) {
            let mut done = BuildStatusResponse::new(BuildState::Completed);
            done.binary_url = Some("/artifacts/b-1".to_string());
            done.node_id = Some("n1".to_string());
            self.push_status(Ok(done));
        }

        pub fn unreachable(self) -> Self {
            self.reachable.store(false, Ordering::SeqCst);
            self
        }
    }

    impl CoordinatorApi for ScriptedCoordinator {
        async fn submit(&self, _body: &SubmitBuildBody) -> Result<SubmitOutcome, ClientError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(SubmitOutcome {
                build_id: "b-1".to_string(),
                reused: false,
                queue_position: Some(0),
                estimated_time: None,
            })
        }

        async fn status(&self, _build_id: &str) -> Result<BuildStatusResponse, ClientError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            // An exhausted script keeps reporting `running`.
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(BuildStatusResponse::new(BuildState::Running)))
        }

        async fn download(&self, _url: &str, dest: &Path) -> Result<u64, ClientError> {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(dest, &self.artifact).unwrap();
            Ok(self.artifact.len() as u64)
        }

        async fn health(&self) -> Result<(), ClientError> {
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ClientError::Unreachable("connection refused".to_string()))
            }
        }

        async fn architectures(&self) -> Result<Vec<String>, ClientError> {
            Ok(vec!["linux-x64".to_string()])
        }

        async fn queue_status(&self) -> Result<serde_json::Value, ClientError> {
            Ok(serde_json::json!({ "active_jobs": 0 }))
        }
    }
}
