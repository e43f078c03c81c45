//! Completion notice consumer.
//!
//! Whatever delivers job results from agents holds the sender half; each
//! notice is folded into the registry through the dispatcher.

use crate::dispatch::{JobDispatcher, NodeTransport};
use rbc_common::JobCompletion;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct CompletionConsumer<T> {
    dispatcher: JobDispatcher<T>,
    rx: mpsc::Receiver<JobCompletion>,
}

impl<T: NodeTransport> CompletionConsumer<T> {
    pub fn new(dispatcher: JobDispatcher<T>, buffer: usize) -> (Self, mpsc::Sender<JobCompletion>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { dispatcher, rx }, tx)
    }

    /// Consume notices until every sender is dropped or the registry stops.
    pub async fn run(mut self) {
        while let Some(completion) = self.rx.recv().await {
            let job_id = completion.job_id.clone();
            match self.dispatcher.complete(completion).await {
                Ok(Some(done)) => debug!(job_id = %done.job_id, success = done.success, "Completion applied"),
                // Unknown jobs are already logged by the registry.
                Ok(None) => {}
                Err(e) => {
                    error!(job_id = %job_id, "Registry unavailable, stopping completion consumer: {}", e);
                    return;
                }
            }
        }
        info!("Completion channel closed");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::RecordingTransport;
    use crate::events::EventBus;
    use crate::registry::NodeRegistry;
    use rbc_common::{BuildRequest, NodeId, NodeRegistration};

    #[tokio::test]
    async fn notices_are_applied_in_order() {
        let (registry, _task) = NodeRegistry::spawn();
        let dispatcher = JobDispatcher::new(
            registry.clone(),
            RecordingTransport::default(),
            EventBus::default(),
        );
        registry
            .register(NodeRegistration {
                id: Some("n1".into()),
                architecture: Some("linux-x64".into()),
                endpoint: Some("http://n1:9000".into()),
                capabilities: Some(vec![]),
                max_concurrent: Some(2),
            })
            .await
            .unwrap();

        let request = BuildRequest::builder("1.0.0", "linux-x64".parse().unwrap())
            .build()
            .unwrap();
        let a = dispatcher.submit(&NodeId::new("n1"), request.clone()).await.unwrap();
        let b = dispatcher.submit(&NodeId::new("n1"), request).await.unwrap();

        let (consumer, tx) = CompletionConsumer::new(dispatcher, 8);
        let handle = consumer.spawn();

        tx.send(JobCompletion { job_id: a.job_id.clone(), success: true }).await.unwrap();
        tx.send(JobCompletion { job_id: "unknown".into(), success: true }).await.unwrap();
        tx.send(JobCompletion { job_id: b.job_id, success: false }).await.unwrap();
        tx.send(JobCompletion { job_id: a.job_id, success: true }).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let node = &registry.snapshot().await.unwrap()[0].node;
        assert_eq!(node.current_jobs, 0);
        assert_eq!(node.total_builds, 2);
        assert_eq!(node.successful_builds, 1);
        assert!(registry.active_jobs().await.unwrap().is_empty());
    }
}
