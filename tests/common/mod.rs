#![allow(dead_code)]

use shardlot::{
    Coordinator, CoordinatorConfig, Directory, InMemoryDirectory, NodeAddress, NodeConfig,
    NodeService, NodeState, ShardSet,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

pub const COORDINATOR_PORT: u16 = 1180;
pub const WAIT: Duration = Duration::from_secs(5);

pub fn shards(roles: &[&str]) -> ShardSet {
    ShardSet::from_roles(roles.iter().copied()).unwrap()
}

pub async fn start_coordinator(directory: &InMemoryDirectory, roles: &[&str]) -> Coordinator {
    let config = CoordinatorConfig::new()
        .port(COORDINATOR_PORT)
        .port_attempts(1)
        .call_timeout(Duration::from_millis(200));
    Coordinator::start(config, Arc::new(directory.clone()), shards(roles))
        .await
        .unwrap()
}

/// Millisecond health timings so core loss is noticed quickly.
pub fn node_config(coordinator: &NodeAddress) -> NodeConfig {
    NodeConfig::new(coordinator.clone())
        .port(COORDINATOR_PORT + 1)
        .port_attempts(20)
        .health_grace(Duration::from_millis(50))
        .health_interval(Duration::from_millis(20))
        .call_timeout(Duration::from_millis(200))
}

pub async fn launch_node(
    directory: &InMemoryDirectory,
    coordinator: &Coordinator,
    roles: &[&str],
) -> NodeService {
    let directory: Arc<dyn Directory> = Arc::new(directory.clone());
    NodeService::launch(node_config(coordinator.address()), directory, shards(roles))
        .await
        .unwrap()
}

pub async fn wait_for_state(node: &NodeService, state: NodeState) {
    timeout(WAIT, node.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("node never reached {}, stuck at {}", state, node.state()));
}

/// Polls `check` until it holds or the wait runs out.
pub async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(5)).await;
    }
}
