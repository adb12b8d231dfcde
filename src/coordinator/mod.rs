//! The query service: node registry, array formation and global shutdown.
//!
//! All membership state lives in one `Registry` behind one mutex. Remote calls
//! are never made while that mutex is held, and formation always runs on its
//! own spawned task.

pub mod board;
mod formation;
mod registry;

pub use board::ArrayBoard;
pub use registry::Census;

use crate::array::{Array, ArrayId};
use crate::config::CoordinatorConfig;
use crate::core::{ArrayError, CoreTimeoutReport, NodeAddress, NodeId, NodeRecord, Registration, Result};
use crate::directory::{
    ARRAY_BOARD_ENDPOINT, ArrayListener, COORDINATOR_ENDPOINT, CoordinatorApi, Directory, Endpoint,
    open_with_fallback,
};
use crate::shard::ShardSet;
use async_trait::async_trait;
use futures::future::join_all;
use registry::Registry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Observable decision points of the coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    NodeRegistered { node: NodeRecord, fresh: bool },
    ArrayFormed(Array),
    FormationAborted { dropped: NodeRecord, returned: usize, error: ArrayError },
    ServiceStartFailed { node: NodeRecord, error: ArrayError },
    CoreTimeoutReported(CoreTimeoutReport),
    ArrayDissolved { array_id: ArrayId, reason: String },
    Stopped { reason: String },
}

/// Outcome of `stop_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    pub terminated: usize,
    pub unreachable: usize,
}

/// Handle to a running coordinator. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    address: NodeAddress,
    shards: ShardSet,
    directory: Arc<dyn Directory>,
    board: ArrayBoard,
    registry: Mutex<Registry>,
    reports: Mutex<Vec<CoreTimeoutReport>>,
    events: broadcast::Sender<CoordinatorEvent>,
    stopped: watch::Sender<bool>,
}

impl Coordinator {
    /// Opens the coordinator's directory (falling back over successive ports),
    /// then publishes the registration and array-board endpoints.
    pub async fn start(
        config: CoordinatorConfig,
        directory: Arc<dyn Directory>,
        shards: ShardSet,
    ) -> Result<Self> {
        config.validate().map_err(ArrayError::Config)?;
        let address =
            open_with_fallback(directory.as_ref(), &config.host, config.port, config.port_attempts)
                .await?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let (stopped, _) = watch::channel(false);
        let coordinator = Self {
            inner: Arc::new(CoordinatorInner {
                registry: Mutex::new(Registry::new(shards.len())),
                config,
                address: address.clone(),
                shards,
                directory: Arc::clone(&directory),
                board: ArrayBoard::new(),
                reports: Mutex::new(Vec::new()),
                events,
                stopped,
            }),
        };

        directory
            .bind(
                &address,
                COORDINATOR_ENDPOINT,
                Endpoint::Coordinator(Arc::new(coordinator.clone())),
            )
            .await?;
        directory
            .bind(
                &address,
                ARRAY_BOARD_ENDPOINT,
                Endpoint::Board(Arc::new(coordinator.inner.board.clone())),
            )
            .await?;

        info!(
            %address,
            roles = ?coordinator.inner.shards.roles(),
            "Query service started"
        );
        Ok(coordinator)
    }

    pub fn address(&self) -> &NodeAddress {
        &self.inner.address
    }

    pub fn roles(&self) -> Vec<String> {
        self.inner.shards.roles()
    }

    pub fn board(&self) -> &ArrayBoard {
        &self.inner.board
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Resolves once `stop_all` has finished.
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub async fn unassigned_nodes(&self) -> Vec<NodeRecord> {
        self.inner.registry.lock().await.unassigned()
    }

    pub async fn active_arrays(&self) -> Vec<Array> {
        self.inner.registry.lock().await.arrays()
    }

    pub async fn census(&self) -> Census {
        self.inner.registry.lock().await.census()
    }

    pub async fn core_timeout_reports(&self) -> Vec<CoreTimeoutReport> {
        self.inner.reports.lock().await.clone()
    }

    /// Admits a node into the unassigned pool.
    ///
    /// Unknown or absent identifiers get a fresh one; known identifiers keep
    /// theirs and refresh the stored address. Launches a formation task when
    /// the pool can cover every required role.
    pub async fn register_node(&self, node: NodeRecord) -> Result<Registration> {
        let admission = {
            let mut registry = self.inner.registry.lock().await;
            if registry.is_closed() {
                return Err(ArrayError::Terminated("query service stopped".to_string()));
            }
            registry.register(node)
        };
        let record = admission.record;

        info!(
            node = %record.label(),
            fresh = admission.fresh,
            "Node registered"
        );
        self.emit(CoordinatorEvent::NodeRegistered {
            node: record.clone(),
            fresh: admission.fresh,
        });

        if let Some(array) = admission.dissolved {
            let this = self.clone();
            let except = record.id;
            tokio::spawn(async move {
                this.announce_dissolution(array, "Member re-registered".to_string(), except)
                    .await;
            });
        }
        if admission.launch_formation {
            self.launch_formation();
        }

        Ok(Registration {
            node: record,
            coordinator: self.inner.address.clone(),
        })
    }

    /// Atomically takes `n` nodes out of the pool, or none if fewer are available.
    pub async fn checkout_nodes(&self, n: usize) -> Option<Vec<NodeRecord>> {
        self.inner.registry.lock().await.checkout(n)
    }

    /// Puts nodes back into the pool.
    pub async fn check_in_nodes(&self, nodes: Vec<NodeRecord>) {
        if nodes.is_empty() {
            return;
        }
        let launch = self.inner.registry.lock().await.check_in(nodes);
        if launch {
            self.launch_formation();
        }
    }

    /// Drops an array from the active list, closes it to clients and tells its
    /// members. Returns the array if it was active.
    pub async fn remove_array(&self, array_id: &ArrayId, reason: &str) -> Option<Array> {
        let array = self.inner.registry.lock().await.remove_array(array_id)?;
        self.announce_dissolution(array.clone(), reason.to_string(), None)
            .await;
        Some(array)
    }

    /// Terminates every node the coordinator knows about, then stops itself.
    pub async fn stop_all(&self, reason: &str) -> ShutdownReport {
        warn!(reason, "Query service stopping all nodes");
        let (arrays, loose) = self.inner.registry.lock().await.drain();

        let targets: Vec<NodeRecord> = arrays
            .iter()
            .flat_map(|a| a.members().map(|(_, n)| n.clone()).collect::<Vec<_>>())
            .chain(loose)
            .collect();
        let outcomes = join_all(targets.iter().map(|node| self.terminate_remote(node, reason))).await;

        let mut report = ShutdownReport::default();
        for (node, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.terminated += 1,
                Err(e) => {
                    warn!(node = %node.label(), error = %e, "Can't contact node");
                    report.unreachable += 1;
                }
            }
        }

        for array in &arrays {
            if let Err(e) = self.inner.board.close_array(array.id()).await {
                debug!(error = %e, "Board close failed during shutdown");
            }
        }

        self.inner.stopped.send_replace(true);
        if let Err(e) = self.inner.directory.close(&self.inner.address).await {
            warn!(error = %e, "Failed to close coordinator directory");
        }
        error!(
            reason,
            terminated = report.terminated,
            unreachable = report.unreachable,
            "Query service terminated"
        );
        self.emit(CoordinatorEvent::Stopped {
            reason: reason.to_string(),
        });
        report
    }

    async fn terminate_remote(&self, node: &NodeRecord, reason: &str) -> Result<()> {
        let admin = self
            .bounded(self.inner.directory.resolve_node(&node.address))
            .await?;
        self.bounded(admin.terminate(reason.to_string())).await
    }

    async fn announce_dissolution(&self, array: Array, reason: String, except: Option<NodeId>) {
        match self.bounded(self.inner.directory.resolve_board(&self.inner.address)).await {
            Ok(board) => {
                if let Err(e) = self.bounded(board.close_array(array.id())).await {
                    warn!(array = %array.id(), error = %e, "Can't close array to clients");
                }
            }
            Err(e) => warn!(array = %array.id(), error = %e, "Can't close array to clients"),
        }

        let members: Vec<NodeRecord> = array
            .members()
            .map(|(_, n)| n.clone())
            .filter(|n| except.is_none() || n.id != except)
            .collect();
        let array_id = array.id();
        let notices = members.iter().map(|node| {
            let reason = reason.clone();
            async move {
                let admin = self
                    .bounded(self.inner.directory.resolve_node(&node.address))
                    .await?;
                self.bounded(admin.array_dissolved(array_id, reason)).await
            }
        });
        for (node, outcome) in members.iter().zip(join_all(notices).await) {
            let Err(e) = outcome else {
                continue;
            };
            info!(node = %node.label(), error = %e, "Dissolution notice not delivered");
            // Gone for good unless it registers again, which issues a fresh id.
            if let (true, Some(id)) = (e.is_unreachable(), node.id) {
                if self.inner.registry.lock().await.forget_detached(&id) {
                    warn!(node = %node.label(), "Forgot unreachable array member");
                }
            }
        }

        warn!(array = %array.id(), reason = %reason, "Array dissolved");
        self.emit(CoordinatorEvent::ArrayDissolved {
            array_id: array.id(),
            reason,
        });
    }

    fn launch_formation(&self) {
        info!("Creating new array");
        tokio::spawn(formation::form_array(self.clone()));
    }

    /// Bounds a remote call by the configured call timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        timeout(self.inner.config.call_timeout, call)
            .await
            .map_err(|_| ArrayError::Timeout("remote call".to_string()))?
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[async_trait]
impl CoordinatorApi for Coordinator {
    async fn register_node(&self, node: NodeRecord) -> Result<Registration> {
        Coordinator::register_node(self, node).await
    }

    async fn report_core_timeout(&self, report: CoreTimeoutReport) -> Result<()> {
        warn!(
            array = %report.array_id,
            core = %report.core,
            reporter = %report.reporter,
            "Reported core timeout"
        );
        self.inner.reports.lock().await.push(report.clone());
        self.emit(CoordinatorEvent::CoreTimeoutReported(report));
        Ok(())
    }
}
