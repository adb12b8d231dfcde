//! Addressable, name-keyed endpoint directory.
//!
//! Every process opens a directory on a (host, port) and publishes its
//! endpoints there under well-known names. Peers resolve an endpoint by
//! address and name; resolution fails when the address is unreachable or the
//! name is absent. Coordinator and nodes only ever talk through this trait.

pub mod memory;
pub mod tcp;
pub(crate) mod wire;

pub use memory::InMemoryDirectory;
pub use tcp::TcpDirectory;

use crate::array::{Array, ArrayId};
use crate::core::{ArrayError, CoreTimeoutReport, NodeAddress, NodeRecord, Registration, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Coordinator registration endpoint.
pub const COORDINATOR_ENDPOINT: &str = "coordinator";
/// Coordinator's client-facing array announcement endpoint.
pub const ARRAY_BOARD_ENDPOINT: &str = "array-board";
/// Each node's administrative endpoint.
pub const NODE_ADMIN_ENDPOINT: &str = "node-admin";

/// Calls a node accepts from the coordinator and from its peers.
#[async_trait]
pub trait NodeAdmin: Send + Sync {
    /// Liveness check.
    async fn ping(&self) -> Result<bool>;

    /// Hands the node its array and role. Does not start anything yet.
    async fn assign(&self, array: Array, role: String) -> Result<()>;

    async fn start_service(&self) -> Result<()>;

    async fn unassign(&self, reason: String) -> Result<()>;

    /// Unassigns only if the node still belongs to `array_id`.
    async fn array_dissolved(&self, array_id: ArrayId, reason: String) -> Result<()>;

    async fn terminate(&self, reason: String) -> Result<()>;

    /// Current identity, address and role.
    async fn snapshot(&self) -> Result<NodeRecord>;
}

/// The coordinator's registration endpoint.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn register_node(&self, node: NodeRecord) -> Result<Registration>;

    async fn report_core_timeout(&self, report: CoreTimeoutReport) -> Result<()>;
}

/// Client-facing announcements of arrays becoming (un)available.
#[async_trait]
pub trait ArrayListener: Send + Sync {
    async fn open_array(&self, array: Array) -> Result<()>;

    async fn close_array(&self, array_id: ArrayId) -> Result<()>;
}

/// A resolvable handle.
#[derive(Clone)]
pub enum Endpoint {
    Coordinator(Arc<dyn CoordinatorApi>),
    Node(Arc<dyn NodeAdmin>),
    Board(Arc<dyn ArrayListener>),
}

impl Endpoint {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Coordinator(_) => EndpointKind::Coordinator,
            Self::Node(_) => EndpointKind::Node,
            Self::Board(_) => EndpointKind::Board,
        }
    }

    pub fn into_coordinator(self) -> Result<Arc<dyn CoordinatorApi>> {
        match self {
            Self::Coordinator(api) => Ok(api),
            other => Err(ArrayError::WrongEndpoint(other.kind().to_string())),
        }
    }

    pub fn into_node(self) -> Result<Arc<dyn NodeAdmin>> {
        match self {
            Self::Node(admin) => Ok(admin),
            other => Err(ArrayError::WrongEndpoint(other.kind().to_string())),
        }
    }

    pub fn into_board(self) -> Result<Arc<dyn ArrayListener>> {
        match self {
            Self::Board(board) => Ok(board),
            other => Err(ArrayError::WrongEndpoint(other.kind().to_string())),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EndpointKind {
    Coordinator,
    Node,
    Board,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coordinator => "coordinator",
            Self::Node => "node",
            Self::Board => "board",
        };
        f.write_str(name)
    }
}

/// Process-addressable endpoint directory.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Starts serving on (host, port). Fails with `AddressInUse` if taken.
    /// Returns the address actually opened.
    async fn open(&self, host: &str, port: u16) -> Result<NodeAddress>;

    /// Publishes `endpoint` under `name` at a locally opened address.
    async fn bind(&self, address: &NodeAddress, name: &str, endpoint: Endpoint) -> Result<()>;

    async fn resolve(&self, address: &NodeAddress, name: &str) -> Result<Endpoint>;

    /// Stops serving `address`; everything bound there disappears.
    async fn close(&self, address: &NodeAddress) -> Result<()>;

    async fn resolve_node(&self, address: &NodeAddress) -> Result<Arc<dyn NodeAdmin>> {
        self.resolve(address, NODE_ADMIN_ENDPOINT).await?.into_node()
    }

    async fn resolve_coordinator(&self, address: &NodeAddress) -> Result<Arc<dyn CoordinatorApi>> {
        self.resolve(address, COORDINATOR_ENDPOINT)
            .await?
            .into_coordinator()
    }

    async fn resolve_board(&self, address: &NodeAddress) -> Result<Arc<dyn ArrayListener>> {
        self.resolve(address, ARRAY_BOARD_ENDPOINT).await?.into_board()
    }
}

/// Opens a directory on the first free port of `port..port + attempts`.
pub async fn open_with_fallback(
    directory: &dyn Directory,
    host: &str,
    port: u16,
    attempts: u16,
) -> Result<NodeAddress> {
    if attempts == 0 {
        return Err(ArrayError::Config("port_attempts must be > 0".to_string()));
    }
    let last = port.checked_add(attempts - 1).ok_or_else(|| {
        ArrayError::Config(format!("port range {}+{} overflows", port, attempts))
    })?;

    for candidate in port..=last {
        match directory.open(host, candidate).await {
            Ok(address) => return Ok(address),
            Err(ArrayError::AddressInUse(_)) => {
                warn!(port = candidate, "Directory port in use, trying next");
            }
            Err(e) => return Err(e),
        }
    }
    Err(ArrayError::PortRangeExhausted { first: port, last })
}

