use rbc::{BuildExecutor, ClientError, CoordinatorApi, ExecutorError, SubmitOutcome};
use rbc_common::{BuildState, BuildStatusResponse, SubmitBuildBody, TargetArch};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Executor that either returns fixed artifacts or fails with a message.
pub struct MockExecutor {
    artifacts: Option<Vec<PathBuf>>,
    pub calls: AtomicUsize,
}

impl MockExecutor {
    pub fn succeeding(artifacts: &[&str]) -> Self {
        Self {
            artifacts: Some(artifacts.iter().map(PathBuf::from).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            artifacts: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BuildExecutor for MockExecutor {
    async fn compile(
        &self,
        _version: &str,
        _source: &Path,
        _target: TargetArch,
    ) -> Result<Vec<PathBuf>, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.artifacts {
            Some(artifacts) => Ok(artifacts.clone()),
            None => Err(ExecutorError::Failed {
                program: "mock-build".to_string(),
                code: Some(1),
                stderr: "linker not found".to_string(),
            }),
        }
    }
}

/// Coordinator that completes every build immediately.
pub struct MockCoordinator {
    reachable: bool,
    fail_builds: bool,
    artifact: Vec<u8>,
    pub submissions: AtomicUsize,
    pub health_checks: AtomicUsize,
}

impl MockCoordinator {
    pub fn reachable() -> Self {
        Self {
            reachable: true,
            fail_builds: false,
            artifact: b"remote-binary".to_vec(),
            submissions: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::reachable()
        }
    }

    pub fn failing_builds() -> Self {
        Self {
            fail_builds: true,
            ..Self::reachable()
        }
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }
}

impl CoordinatorApi for MockCoordinator {
    async fn submit(&self, _body: &SubmitBuildBody) -> Result<SubmitOutcome, ClientError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(SubmitOutcome {
            build_id: "remote-1".to_string(),
            reused: false,
            queue_position: None,
            estimated_time: None,
        })
    }

    async fn status(&self, _build_id: &str) -> Result<BuildStatusResponse, ClientError> {
        if self.fail_builds {
            let mut failed = BuildStatusResponse::new(BuildState::Failed);
            failed.error = Some("remote toolchain crashed".to_string());
            return Ok(failed);
        }
        let mut done = BuildStatusResponse::new(BuildState::Completed);
        done.binary_url = Some("/artifacts/remote-1".to_string());
        Ok(done)
    }

    async fn download(&self, _url: &str, dest: &Path) -> Result<u64, ClientError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dest, &self.artifact).unwrap();
        Ok(self.artifact.len() as u64)
    }

    async fn health(&self) -> Result<(), ClientError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Ok(())
        } else {
            Err(ClientError::Unreachable("connection refused".to_string()))
        }
    }

    async fn architectures(&self) -> Result<Vec<String>, ClientError> {
        Ok(vec!["linux-x64".to_string(), "darwin-arm64".to_string()])
    }

    async fn queue_status(&self) -> Result<serde_json::Value, ClientError> {
        Ok(serde_json::json!({ "active_jobs": 0 }))
    }
}
