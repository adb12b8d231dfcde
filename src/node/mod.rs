//! A worker's own lifecycle controller.
//!
//! `NodeRecord` is what travels between processes; `NodeService` is the live
//! side on the node's own process. It holds the current assignment and the
//! core health check, and serves the node's admin endpoint.

mod health;

use crate::array::{Array, ArrayId};
use crate::config::NodeConfig;
use crate::core::{
    ArrayError, CoreTimeoutReport, NodeAddress, NodeId, NodeRecord, NodeState, Registration, Result,
};
use crate::directory::{Directory, Endpoint, NODE_ADMIN_ENDPOINT, NodeAdmin, open_with_fallback};
use crate::shard::{CORE_ROLE, ShardSet};
use async_trait::async_trait;
use chrono::Utc;
use health::HealthCheck;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Reason given when a member leaves because its core stopped answering.
pub const CORE_TIMEOUT_REASON: &str = "Core timeout!";

/// Handle to the node running in this process. Cheap to clone.
#[derive(Clone)]
pub struct NodeService {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    config: NodeConfig,
    directory: Arc<dyn Directory>,
    shards: ShardSet,
    slot: Mutex<Slot>,
    state: watch::Sender<NodeState>,
    transitions: broadcast::Sender<NodeState>,
}

/// Mutable assignment state. Never held across a remote call.
struct Slot {
    id: Option<NodeId>,
    address: NodeAddress,
    role: Option<String>,
    array: Option<Array>,
    health: Option<HealthCheck>,
}

impl Slot {
    /// Drops the assignment and its health check in one step.
    fn release(&mut self) -> Option<Array> {
        self.health = None;
        self.role = None;
        self.array.take()
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id,
            address: self.address.clone(),
            role: self.role.clone(),
        }
    }
}

impl NodeService {
    /// Opens the node's directory (falling back over successive ports),
    /// publishes the admin endpoint and registers with the coordinator.
    ///
    /// Failing to register is fatal: the directory is closed again and the
    /// error returned, leaving the node `Terminated`.
    pub async fn launch(
        config: NodeConfig,
        directory: Arc<dyn Directory>,
        shards: ShardSet,
    ) -> Result<Self> {
        config.validate().map_err(ArrayError::Config)?;
        let address =
            open_with_fallback(directory.as_ref(), &config.host, config.port, config.port_attempts)
                .await?;

        let (state, _) = watch::channel(NodeState::Unbound);
        let (transitions, _) = broadcast::channel(config.event_capacity);
        let node = Self {
            inner: Arc::new(NodeInner {
                config,
                directory: Arc::clone(&directory),
                shards,
                slot: Mutex::new(Slot {
                    id: None,
                    address: address.clone(),
                    role: None,
                    array: None,
                    health: None,
                }),
                state,
                transitions,
            }),
        };

        directory
            .bind(&address, NODE_ADMIN_ENDPOINT, Endpoint::Node(Arc::new(node.clone())))
            .await?;
        info!(%address, "Node admin endpoint ready");

        if let Err(e) = node.register().await {
            node.shutdown("registration failed").await;
            return Err(e);
        }
        Ok(node)
    }

    pub fn state(&self) -> NodeState {
        *self.inner.state.borrow()
    }

    /// Every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeState> {
        self.inner.transitions.subscribe()
    }

    /// Waits until the node is in `state`.
    pub async fn wait_for_state(&self, state: NodeState) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Resolves once the node has terminated.
    pub async fn terminated(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(NodeState::is_terminal).await;
    }

    pub async fn id(&self) -> Option<NodeId> {
        self.inner.slot.lock().await.id
    }

    pub async fn address(&self) -> NodeAddress {
        self.inner.slot.lock().await.address.clone()
    }

    pub async fn role(&self) -> Option<String> {
        self.inner.slot.lock().await.role.clone()
    }

    pub async fn array(&self) -> Option<Array> {
        self.inner.slot.lock().await.array.clone()
    }

    pub async fn record(&self) -> NodeRecord {
        self.inner.slot.lock().await.record()
    }

    /// Registers with the bootstrap coordinator address and adopts the
    /// identifier it hands back.
    pub async fn register(&self) -> Result<Registration> {
        let snapshot = self.record().await.unassigned();
        let coordinator = self.inner.config.coordinator.clone();

        let outcome = self
            .bounded(async {
                let api = self.inner.directory.resolve_coordinator(&coordinator).await?;
                api.register_node(snapshot).await
            })
            .await;

        match outcome {
            Ok(registration) => {
                let port = {
                    let mut slot = self.inner.slot.lock().await;
                    slot.id = registration.node.id;
                    // A formation may already have pushed an assignment.
                    if slot.array.is_none() {
                        self.set_state(NodeState::Registered);
                    }
                    slot.address.port
                };
                info!(
                    node = %registration.node.label(),
                    port,
                    "Successfully registered with query service"
                );
                Ok(registration)
            }
            Err(e) => {
                error!(
                    coordinator = %coordinator,
                    error = %e,
                    "Can't connect to query service"
                );
                Err(ArrayError::CoordinatorUnreachable {
                    address: coordinator.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Records the array and role this node now holds.
    pub async fn assign(&self, array: Array, role: &str) -> Result<()> {
        self.ensure_alive()?;
        if array.member(role).is_none() {
            return Err(ArrayError::InvalidRoleSet(format!(
                "role '{}' is not part of array {}",
                role,
                array.id()
            )));
        }
        {
            let mut slot = self.inner.slot.lock().await;
            slot.health = None;
            slot.role = Some(role.to_string());
            slot.array = Some(array.clone());
        }
        debug!(array = %array.id(), role, "Node assigned");
        self.set_state(NodeState::Assigned);
        Ok(())
    }

    /// Starts the assigned role, after checking the local port against the
    /// array's record of it. Non-core roles then start watching the core.
    pub async fn start_service(&self) -> Result<()> {
        self.ensure_alive()?;
        let (array, role, record) = {
            let mut slot = self.inner.slot.lock().await;
            let (Some(array), Some(role)) = (slot.array.clone(), slot.role.clone()) else {
                return Err(ArrayError::NotAssigned);
            };
            verify_port(&mut slot, &array, &role);
            (array, role, slot.record())
        };

        let core = array
            .core()
            .map(|c| c.address.to_string())
            .unwrap_or_default();
        info!(
            address = %record.address,
            core = %core,
            role = %role,
            "Service started"
        );

        match self.inner.shards.get(&role) {
            Some(shard) => shard.start_shard(&array, &record).await?,
            None => warn!(role = %role, "No local behavior registered for role"),
        }

        if role != CORE_ROLE {
            let check = HealthCheck::start(
                self.clone(),
                array.clone(),
                self.inner.config.health_grace,
                self.inner.config.health_interval,
            );
            let mut slot = self.inner.slot.lock().await;
            // Unassigned in the meantime: the check is dropped on the spot.
            if slot.array.as_ref().map(Array::id) == Some(array.id()) {
                slot.health = Some(check);
            }
        }
        self.set_state(NodeState::Servicing);
        Ok(())
    }

    /// Leaves the current array (if any) and re-registers.
    ///
    /// Failing to re-register is as fatal as failing the first registration.
    pub async fn unassign(&self, reason: &str) -> Result<()> {
        self.ensure_alive()?;
        let released = self.inner.slot.lock().await.release();
        self.rejoin(reason, released).await
    }

    /// Unassigns only if this node is still a member of `array_id`.
    pub async fn array_dissolved(&self, array_id: ArrayId, reason: &str) -> Result<()> {
        self.ensure_alive()?;
        let released = {
            let mut slot = self.inner.slot.lock().await;
            if slot.array.as_ref().map(Array::id) != Some(array_id) {
                debug!(array = %array_id, "Ignoring dissolution of an array this node left");
                return Ok(());
            }
            slot.release()
        };
        self.rejoin(reason, released).await
    }

    async fn rejoin(&self, reason: &str, released: Option<Array>) -> Result<()> {
        warn!(
            reason,
            array = ?released.as_ref().map(Array::id),
            "Node unassigned"
        );
        self.set_state(NodeState::Unassigned);

        if let Err(e) = self.register().await {
            self.shutdown("unable to re-register").await;
            return Err(e);
        }
        Ok(())
    }

    /// Unrecoverable shutdown.
    pub async fn terminate(&self, reason: &str) {
        error!(reason, "Node to terminate");
        self.shutdown(reason).await;
    }

    pub(crate) async fn check_core(&self, array: &Array) -> Result<()> {
        let core = array.core().ok_or(ArrayError::NotAssigned)?;
        let alive = self
            .bounded(async {
                let admin = self.inner.directory.resolve_node(&core.address).await?;
                admin.ping().await
            })
            .await?;
        if alive {
            Ok(())
        } else {
            Err(ArrayError::Unreachable(format!("core {} answered ping with false", core.address)))
        }
    }

    /// Core of `array` stopped answering: report it, then leave the array.
    pub(crate) async fn core_lost(&self, array: &Array, cause: ArrayError) {
        let still_member = self
            .inner
            .slot
            .lock()
            .await
            .array
            .as_ref()
            .map(Array::id)
            == Some(array.id());
        if !still_member || self.state().is_terminal() {
            return;
        }

        self.set_state(NodeState::HealthCheckFailed);
        warn!(array = %array.id(), error = %cause, "Core timed out");
        self.report_core_timeout(array).await;

        if let Err(e) = self.array_dissolved(array.id(), CORE_TIMEOUT_REASON).await {
            error!(error = %e, "Node could not recover from core timeout");
        }
    }

    /// Best effort: a failed report never stops the node's own recovery.
    async fn report_core_timeout(&self, array: &Array) {
        let Some(core) = array.core() else {
            return;
        };
        let report = CoreTimeoutReport {
            array_id: array.id(),
            core: core.address.clone(),
            reporter: self.address().await,
            reported_at: Utc::now(),
        };
        let outcome = self
            .bounded(async {
                let api = self
                    .inner
                    .directory
                    .resolve_coordinator(array.coordinator())
                    .await?;
                api.report_core_timeout(report).await
            })
            .await;
        if let Err(e) = outcome {
            warn!(error = %e, "Unable to inform query service of core timeout");
        }
    }

    async fn shutdown(&self, reason: &str) {
        let address = {
            let mut slot = self.inner.slot.lock().await;
            slot.health = None;
            slot.address.clone()
        };
        if let Err(e) = self.inner.directory.close(&address).await {
            warn!(error = %e, "Failed to close node directory");
        }
        self.set_state(NodeState::Terminated);
        info!(reason, %address, "Node terminated");
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(ArrayError::Terminated("node is shut down".to_string()));
        }
        Ok(())
    }

    fn set_state(&self, state: NodeState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Node state changed");
        }
        let _ = self.inner.transitions.send(state);
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        timeout(self.inner.config.call_timeout, call)
            .await
            .map_err(|_| ArrayError::Timeout("remote call".to_string()))?
    }
}

/// Adopts the port the array recorded for this node's role if it differs.
fn verify_port(slot: &mut Slot, array: &Array, role: &str) {
    match array.member(role) {
        Some(member) if member.address.port != slot.address.port => {
            info!(
                from = slot.address.port,
                to = member.address.port,
                "Node port reset"
            );
            slot.address.port = member.address.port;
        }
        Some(_) => debug!(port = slot.address.port, "Node port verified"),
        None => warn!(role, "Node port verification failed"),
    }
}

#[async_trait]
impl NodeAdmin for NodeService {
    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn assign(&self, array: Array, role: String) -> Result<()> {
        NodeService::assign(self, array, &role).await
    }

    async fn start_service(&self) -> Result<()> {
        NodeService::start_service(self).await
    }

    async fn unassign(&self, reason: String) -> Result<()> {
        NodeService::unassign(self, &reason).await
    }

    async fn array_dissolved(&self, array_id: ArrayId, reason: String) -> Result<()> {
        NodeService::array_dissolved(self, array_id, &reason).await
    }

    async fn terminate(&self, reason: String) -> Result<()> {
        NodeService::terminate(self, &reason).await;
        Ok(())
    }

    async fn snapshot(&self) -> Result<NodeRecord> {
        Ok(self.record().await)
    }
}
