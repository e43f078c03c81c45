//! Node health monitoring.
//!
//! Purely heartbeat-driven: a periodic sweep demotes nodes whose last
//! heartbeat is older than the timeout. Nodes are never probed, and only a
//! fresh heartbeat brings an offline node back.

use crate::events::{EventBus, EventKind};
use crate::registry::NodeRegistry;
use rbc_common::{CoordinatorConfig, NodeId};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default health sweep interval.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default heartbeat expiry.
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between sweeps.
    pub check_interval: Duration,
    /// Heartbeat age after which a node is marked offline.
    pub heartbeat_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

impl From<&CoordinatorConfig> for HealthConfig {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            check_interval: config.health_check_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }
}

pub struct HealthMonitor {
    registry: NodeRegistry,
    config: HealthConfig,
    events: EventBus,
}

impl HealthMonitor {
    pub fn new(registry: NodeRegistry, config: HealthConfig, events: EventBus) -> Self {
        Self {
            registry,
            config,
            events,
        }
    }

    /// Start the sweep loop. Each sweep schedules the next one after it
    /// finishes, so sweeps never overlap.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Health monitor started (interval: {:?}, heartbeat timeout: {:?})",
                self.config.check_interval, self.config.heartbeat_timeout
            );
            loop {
                tokio::time::sleep(self.config.check_interval).await;
                if self.sweep_once().await.is_none() {
                    info!("Registry stopped, health monitor exiting");
                    break;
                }
            }
        })
    }

    /// Run one sweep. Returns the demoted ids, or `None` if the registry is
    /// gone. Never fails otherwise.
    pub async fn sweep_once(&self) -> Option<Vec<NodeId>> {
        let demoted = match self.registry.sweep(self.config.heartbeat_timeout).await {
            Ok(demoted) => demoted,
            Err(e) => {
                warn!("Health sweep skipped: {}", e);
                return None;
            }
        };

        if demoted.is_empty() {
            debug!("Health sweep: all heartbeats fresh");
        }
        for node_id in &demoted {
            warn!(
                node_id = %node_id,
                timeout_secs = self.config.heartbeat_timeout.as_secs(),
                "Heartbeat expired, node marked offline"
            );
            self.events.emit(EventKind::NodeOffline, &json!({ "node_id": node_id }));
        }
        Some(demoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_clock::ManualClock;
    use rbc_common::{HeartbeatPayload, NodeRegistration, NodeStatus};

    fn registration(id: &str) -> NodeRegistration {
        NodeRegistration {
            id: Some(id.to_string()),
            architecture: Some("linux-x64".to_string()),
            endpoint: Some(format!("http://{id}:9000")),
            capabilities: Some(vec![]),
            max_concurrent: None,
        }
    }

    async fn status(registry: &NodeRegistry, id: &str) -> NodeStatus {
        registry
            .snapshot()
            .await
            .unwrap()
            .into_iter()
            .find(|v| v.node.id.as_str() == id)
            .unwrap()
            .node
            .status
    }

    #[test]
    fn test_health_config_default() {
        let config = HealthConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_health_config_from_coordinator_config() {
        let config = CoordinatorConfig {
            heartbeat_timeout_secs: 90,
            health_check_interval_secs: 10,
            ..CoordinatorConfig::default()
        };
        let health = HealthConfig::from(&config);
        assert_eq!(health.check_interval, Duration::from_secs(10));
        assert_eq!(health.heartbeat_timeout, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn sweep_once_demotes_and_publishes() {
        let clock = ManualClock::new();
        let (registry, _task) = NodeRegistry::spawn_with_clock(clock.as_clock());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let monitor = HealthMonitor::new(registry.clone(), HealthConfig::default(), events);

        registry.register(registration("stale")).await.unwrap();
        registry.register(registration("fresh")).await.unwrap();
        clock.advance_secs(45);
        registry
            .heartbeat(NodeId::new("fresh"), HeartbeatPayload::default())
            .await
            .unwrap();
        clock.advance_secs(20);

        let demoted = monitor.sweep_once().await.unwrap();
        assert_eq!(demoted, vec![NodeId::new("stale")]);
        assert_eq!(status(&registry, "stale").await, NodeStatus::Offline);
        assert_eq!(status(&registry, "fresh").await, NodeStatus::Available);

        let event: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["event"], "node_offline");
        assert_eq!(event["data"]["node_id"], "stale");
    }

    #[tokio::test]
    async fn offline_node_revived_only_by_heartbeat() {
        let clock = ManualClock::new();
        let (registry, _task) = NodeRegistry::spawn_with_clock(clock.as_clock());
        let monitor = HealthMonitor::new(registry.clone(), HealthConfig::default(), EventBus::default());

        registry.register(registration("n1")).await.unwrap();
        clock.advance_secs(61);
        monitor.sweep_once().await.unwrap();
        assert_eq!(status(&registry, "n1").await, NodeStatus::Offline);

        // Another sweep does not bring it back.
        assert!(monitor.sweep_once().await.unwrap().is_empty());
        assert_eq!(status(&registry, "n1").await, NodeStatus::Offline);

        registry
            .heartbeat(NodeId::new("n1"), HeartbeatPayload::default())
            .await
            .unwrap();
        assert_eq!(status(&registry, "n1").await, NodeStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_sweeps_on_interval() {
        let clock = ManualClock::new();
        let (registry, _task) = NodeRegistry::spawn_with_clock(clock.as_clock());
        registry.register(registration("n1")).await.unwrap();

        let handle = HealthMonitor::new(registry.clone(), HealthConfig::default(), EventBus::default())
            .start();

        clock.advance_secs(61);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(status(&registry, "n1").await, NodeStatus::Offline);

        handle.abort();
    }

    #[tokio::test]
    async fn sweep_once_reports_stopped_registry() {
        let (registry, task) = NodeRegistry::spawn();
        task.abort();
        let _ = task.await;
        let monitor = HealthMonitor::new(registry, HealthConfig::default(), EventBus::default());
        assert!(monitor.sweep_once().await.is_none());
    }
}
