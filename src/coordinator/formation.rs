use super::{Coordinator, CoordinatorEvent};
use crate::array::{Array, ArrayBuilder};
use crate::core::{ArrayError, NodeRecord, Result};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One formation attempt.
///
/// Claims exactly one node per required role, pings each, and either
/// publishes the complete array and pushes it to every member, or returns
/// the batch (minus the node that failed its ping) to the pool.
pub(super) async fn form_array(coordinator: Coordinator) -> Option<Array> {
    let roles = coordinator.roles();
    let Some(batch) = coordinator.checkout_nodes(roles.len()).await else {
        debug!("Not enough unassigned nodes; formation skipped");
        return None;
    };

    let mut builder = ArrayBuilder::new(coordinator.address().clone(), roles.clone());
    let mut pending = batch.into_iter().zip(roles).collect::<Vec<_>>().into_iter();
    let mut verified: Vec<NodeRecord> = Vec::new();

    while let Some((node, role)) = pending.next() {
        let pinged = match builder.assign(&role, node.clone()) {
            Ok(()) => ping_candidate(&coordinator, &node).await,
            Err(e) => Err(e),
        };
        match pinged {
            Ok(()) => verified.push(node),
            Err(e) => {
                error!(
                    node = %node.label(),
                    error = %e,
                    "Unable to create new array, candidate failed its ping"
                );
                let returned: Vec<NodeRecord> =
                    verified.into_iter().chain(pending.map(|(n, _)| n)).collect();
                let count = returned.len();
                if let Some(id) = node.id {
                    coordinator.inner.registry.lock().await.forget(&id);
                }
                coordinator.check_in_nodes(returned).await;
                info!(returned = count, "Returned good nodes to the pool");
                coordinator.emit(CoordinatorEvent::FormationAborted {
                    dropped: node,
                    returned: count,
                    error: e,
                });
                return None;
            }
        }
    }

    let array = match builder.build() {
        Ok(array) => array,
        Err(e) => {
            // Unreachable with one node per role, but never strand the batch.
            error!(error = %e, "Formed array is incomplete");
            coordinator.check_in_nodes(verified).await;
            return None;
        }
    };

    let published = coordinator
        .inner
        .registry
        .lock()
        .await
        .publish(array.clone());
    if !published {
        // Shut down mid-formation; the batch was already terminated.
        warn!(array = %array.id(), "Query service stopped, array discarded");
        return None;
    }
    info!(array = %array, "Array created");
    coordinator.emit(CoordinatorEvent::ArrayFormed(array.clone()));

    let directory = &coordinator.inner.directory;
    match coordinator
        .bounded(directory.resolve_board(coordinator.address()))
        .await
    {
        Ok(board) => {
            if let Err(e) = coordinator.bounded(board.open_array(array.clone())).await {
                warn!(array = %array.id(), error = %e, "Can't open array to clients");
            }
        }
        Err(e) => warn!(array = %array.id(), error = %e, "Can't open array to clients"),
    }

    start_members(&coordinator, &array).await;
    Some(array)
}

/// Reachability check: the node's admin endpoint resolves and answers a ping.
async fn ping_candidate(coordinator: &Coordinator, node: &NodeRecord) -> Result<()> {
    let admin = coordinator
        .bounded(coordinator.inner.directory.resolve_node(&node.address))
        .await?;
    if coordinator.bounded(admin.ping()).await? {
        Ok(())
    } else {
        Err(ArrayError::Unreachable(format!(
            "{} answered ping with false",
            node.address
        )))
    }
}

/// Pushes the array and role to every member and starts its service, one task
/// per member. Failures are logged per node; the array stays published.
async fn start_members(coordinator: &Coordinator, array: &Array) {
    let mut pushes = JoinSet::new();
    for (role, node) in array.members() {
        let coordinator = coordinator.clone();
        let array = array.clone();
        let role = role.to_string();
        let node = node.clone();
        pushes.spawn(async move {
            let outcome = push_start(&coordinator, array, role, &node).await;
            (node, outcome)
        });
    }

    while let Some(joined) = pushes.join_next().await {
        match joined {
            Ok((node, Ok(()))) => debug!(node = %node.label(), "Service start delivered"),
            Ok((node, Err(e))) => {
                warn!(node = %node.label(), error = %e, "Service start failed");
                coordinator.emit(CoordinatorEvent::ServiceStartFailed { node, error: e });
            }
            Err(e) => error!(error = %e, "Service start task panicked"),
        }
    }
}

async fn push_start(
    coordinator: &Coordinator,
    array: Array,
    role: String,
    node: &NodeRecord,
) -> Result<()> {
    let admin = coordinator
        .bounded(coordinator.inner.directory.resolve_node(&node.address))
        .await?;
    coordinator.bounded(admin.assign(array, role)).await?;
    coordinator.bounded(admin.start_service()).await
}
