mod common;

use common::*;
use shardlot::{
    ArrayError, Coordinator, CoordinatorConfig, Directory, InMemoryDirectory, NodeAddress,
    NodeId, NodeRecord, NodeService, NodeState, open_with_fallback,
};
use std::sync::Arc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn port_fallback_skips_taken_ports() {
    let directory = InMemoryDirectory::new();
    for port in 1180..1183 {
        directory.open("127.0.0.1", port).await.unwrap();
    }

    let address = assert_ok!(open_with_fallback(&directory, "127.0.0.1", 1180, 21).await);
    assert_eq!(address, NodeAddress::new("127.0.0.1", 1183));
}

#[tokio::test]
async fn coordinator_moves_to_the_next_free_port() {
    let directory = InMemoryDirectory::new();
    directory.open("127.0.0.1", 1180).await.unwrap();

    let coordinator = assert_ok!(
        Coordinator::start(
            CoordinatorConfig::new(),
            Arc::new(directory.clone()),
            shards(&["Worker"]),
        )
        .await
    );
    assert_eq!(coordinator.address().port, 1181);
    assert_eq!(
        directory.names(coordinator.address()).await,
        vec!["array-board".to_string(), "coordinator".to_string()]
    );
}

#[tokio::test]
async fn port_range_exhaustion_is_an_error() {
    let directory = InMemoryDirectory::new();
    for port in 1180..=1200 {
        directory.open("127.0.0.1", port).await.unwrap();
    }

    let err = assert_err!(open_with_fallback(&directory, "127.0.0.1", 1180, 21).await);
    assert_eq!(err, ArrayError::PortRangeExhausted { first: 1180, last: 1200 });

    let started = Coordinator::start(
        CoordinatorConfig::new(),
        Arc::new(directory.clone()),
        shards(&["Worker"]),
    )
    .await;
    assert!(matches!(started, Err(ArrayError::PortRangeExhausted { .. })));
}

#[tokio::test]
async fn node_without_coordinator_does_not_start() {
    let directory = InMemoryDirectory::new();
    let config = node_config(&NodeAddress::new("127.0.0.1", 1180));

    let launched = NodeService::launch(config, Arc::new(directory.clone()), shards(&[])).await;
    let err = launched.err().unwrap();
    assert!(matches!(err, ArrayError::CoordinatorUnreachable { .. }));
    // The node's own address is released again.
    assert!(!directory.is_open(&NodeAddress::new("127.0.0.1", 1181)).await);
}

#[tokio::test]
async fn known_identity_survives_reregistration() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker", "Cache"]).await;
    let node = launch_node(&directory, &coordinator, &[]).await;
    let id = node.id().await.unwrap();

    let again = assert_ok!(coordinator.register_node(node.record().await).await);
    assert_eq!(again.node.id, Some(id));
    assert_eq!(again.coordinator, *coordinator.address());
    assert_eq!(coordinator.unassigned_nodes().await.len(), 1);

    let stranger = NodeRecord::unbound(NodeAddress::new("127.0.0.1", 1190)).with_id(NodeId::new());
    let admitted = assert_ok!(coordinator.register_node(stranger.clone()).await);
    assert_ne!(admitted.node.id, stranger.id);
    assert_eq!(coordinator.census().await.issued, 2);
}

#[tokio::test]
async fn unassign_reregisters_with_same_identity() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker", "Cache"]).await;
    let node = launch_node(&directory, &coordinator, &[]).await;
    let id = node.id().await;

    let mut transitions = node.subscribe();
    assert_ok!(node.unassign("operator").await);
    assert_eq!(transitions.recv().await.unwrap(), NodeState::Unassigned);
    assert_eq!(transitions.recv().await.unwrap(), NodeState::Registered);
    assert_eq!(node.id().await, id);
    assert_eq!(coordinator.unassigned_nodes().await.len(), 1);
}

#[tokio::test]
async fn stop_all_terminates_every_node() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker", "Cache"]).await;
    let members = [
        launch_node(&directory, &coordinator, &[]).await,
        launch_node(&directory, &coordinator, &[]).await,
        launch_node(&directory, &coordinator, &[]).await,
    ];
    for node in &members {
        wait_for_state(node, NodeState::Servicing).await;
    }
    let spare = launch_node(&directory, &coordinator, &[]).await;
    assert_ok!(
        coordinator
            .register_node(NodeRecord::unbound(NodeAddress::new("127.0.0.1", 1199)))
            .await
    );
    let before = coordinator.census().await;
    assert_eq!((before.in_arrays, before.unassigned), (3, 2));

    let report = coordinator.stop_all("Shutting down for test").await;
    assert_eq!(report.terminated, 4);
    assert_eq!(report.unreachable, 1);

    for node in members.iter().chain([&spare]) {
        timeout(WAIT, node.terminated()).await.unwrap();
        assert_eq!(node.state(), NodeState::Terminated);
    }
    timeout(WAIT, coordinator.stopped()).await.unwrap();
    assert!(coordinator.is_stopped());
    assert!(coordinator.active_arrays().await.is_empty());
    assert!(coordinator.board().open_arrays().await.is_empty());
    assert!(!directory.is_open(coordinator.address()).await);

    let late = coordinator
        .register_node(NodeRecord::unbound(NodeAddress::new("127.0.0.1", 1190)))
        .await;
    assert!(matches!(late, Err(ArrayError::Terminated(_))));
    assert_err!(spare.start_service().await);
}

#[tokio::test]
async fn directory_endpoints_are_published() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &[]).await;
    assert_eq!(
        directory.names(coordinator.address()).await,
        vec!["array-board".to_string(), "coordinator".to_string()]
    );

    let lone = NodeService::launch(
        node_config(coordinator.address()),
        Arc::new(directory.clone()) as Arc<dyn Directory>,
        shards(&[]),
    )
    .await
    .unwrap();

    // A core-only role set forms a single-member array immediately.
    wait_for_state(&lone, NodeState::Servicing).await;
    assert_eq!(
        directory.names(&lone.address().await).await,
        vec!["node-admin".to_string()]
    );
}
