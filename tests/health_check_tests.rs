mod common;

use common::*;
use shardlot::{ArrayId, CoordinatorEvent, InMemoryDirectory, NodeState};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

async fn next_transition(rx: &mut broadcast::Receiver<NodeState>) -> NodeState {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn worker_returns_to_pool_when_core_goes_quiet() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker"]).await;
    let mut events = coordinator.subscribe();

    let worker = launch_node(&directory, &coordinator, &["Worker"]).await;
    let core = launch_node(&directory, &coordinator, &["Worker"]).await;
    wait_for_state(&worker, NodeState::Servicing).await;
    wait_for_state(&core, NodeState::Servicing).await;
    let worker_id = worker.id().await;
    let array = coordinator.active_arrays().await.remove(0);
    let pool_before = coordinator.unassigned_nodes().await.len();

    let mut transitions = worker.subscribe();
    assert!(directory.disconnect(&core.address().await).await);

    assert_eq!(next_transition(&mut transitions).await, NodeState::HealthCheckFailed);
    assert_eq!(next_transition(&mut transitions).await, NodeState::Unassigned);
    assert_eq!(next_transition(&mut transitions).await, NodeState::Registered);

    // Same identity after the round trip.
    assert_eq!(worker.id().await, worker_id);
    assert!(worker.role().await.is_none());
    assert!(worker.array().await.is_none());

    let pool = coordinator.unassigned_nodes().await;
    assert_eq!(pool.len(), pool_before + 1);
    assert_eq!(pool[0].id, worker_id);

    let reports = coordinator.core_timeout_reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].array_id, array.id());
    assert_eq!(reports[0].core, core.address().await);
    assert_eq!(reports[0].reporter, worker.address().await);

    assert!(coordinator.active_arrays().await.is_empty());
    eventually("array closed to clients", || async {
        !coordinator.board().is_open(&array.id()).await
    })
    .await;
    // The silent core could not be told about the dissolution and is forgotten.
    eventually("unreachable core forgotten", || async {
        coordinator.census().await.detached == 0
    })
    .await;
    let census = coordinator.census().await;
    assert_eq!((census.unassigned, census.issued), (1, 1));
    assert!(census.is_conserved());

    let mut saw_report = false;
    while let Ok(event) = events.try_recv() {
        if let CoordinatorEvent::CoreTimeoutReported(report) = event {
            assert_eq!(report.array_id, array.id());
            saw_report = true;
        }
    }
    assert!(saw_report);
}

#[tokio::test]
async fn core_timeout_recovers_even_without_the_coordinator_listening() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker"]).await;
    let worker = launch_node(&directory, &coordinator, &[]).await;
    let core = launch_node(&directory, &coordinator, &[]).await;
    wait_for_state(&worker, NodeState::Servicing).await;

    // Both the core and the query service drop off the directory.
    directory.disconnect(&core.address().await).await;
    directory.disconnect(coordinator.address()).await;

    // Reporting fails, re-registration fails: the worker shuts down.
    timeout(WAIT, worker.terminated()).await.unwrap();
    assert_eq!(worker.state(), NodeState::Terminated);
    assert!(!directory.is_open(&worker.address().await).await);
    assert!(coordinator.core_timeout_reports().await.is_empty());
}

#[tokio::test]
async fn core_does_not_watch_itself() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker"]).await;
    let worker = launch_node(&directory, &coordinator, &[]).await;
    let core = launch_node(&directory, &coordinator, &[]).await;
    wait_for_state(&core, NodeState::Servicing).await;

    // With the worker gone, the core keeps servicing well past several intervals.
    directory.disconnect(&worker.address().await).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(core.state(), NodeState::Servicing);
    assert!(coordinator.core_timeout_reports().await.is_empty());
}

#[tokio::test]
async fn stale_dissolution_notice_is_ignored() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker"]).await;
    let worker = launch_node(&directory, &coordinator, &[]).await;
    let _core = launch_node(&directory, &coordinator, &[]).await;
    wait_for_state(&worker, NodeState::Servicing).await;

    assert_ok!(worker.array_dissolved(ArrayId::new(), "someone else's array").await);
    assert_eq!(worker.state(), NodeState::Servicing);
    assert!(worker.array().await.is_some());
}

#[tokio::test]
async fn competing_dissolution_notices_unassign_once() {
    let directory = InMemoryDirectory::new();
    let coordinator = start_coordinator(&directory, &["Worker", "Cache"]).await;
    let worker = launch_node(&directory, &coordinator, &[]).await;
    let _cache = launch_node(&directory, &coordinator, &[]).await;
    let _core = launch_node(&directory, &coordinator, &[]).await;
    wait_for_state(&worker, NodeState::Servicing).await;
    let array_id = worker.array().await.unwrap().id();
    let id = worker.id().await;

    let mut transitions = worker.subscribe();
    let (first, second) = tokio::join!(
        worker.array_dissolved(array_id, "Member re-registered"),
        worker.array_dissolved(array_id, "Core timeout!"),
    );
    assert_ok!(first);
    assert_ok!(second);

    let mut unassigned = 0;
    while let Ok(state) = transitions.try_recv() {
        if state == NodeState::Unassigned {
            unassigned += 1;
        }
    }
    assert_eq!(unassigned, 1);
    assert_eq!(worker.id().await, id);
}
