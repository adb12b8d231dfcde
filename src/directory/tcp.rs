use super::wire::{self, BoardCall, CoordinatorCall, NodeCall, Reply, Request, Response};
use super::{ArrayListener, CoordinatorApi, Directory, Endpoint, EndpointKind, NodeAdmin};
use crate::array::{Array, ArrayId};
use crate::core::{ArrayError, CoreTimeoutReport, NodeAddress, NodeRecord, Registration, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default bound on one request/response exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A `Directory` served over TCP.
///
/// Each opened address runs an accept loop; every connection is served on
/// its own task. Resolved endpoints are proxies that turn each trait call into
/// one request line and wait for one response line.
#[derive(Clone)]
pub struct TcpDirectory {
    call_timeout: Duration,
    served: Arc<Mutex<HashMap<NodeAddress, ServedAddress>>>,
}

struct ServedAddress {
    names: Arc<NameTable>,
    shutdown: watch::Sender<bool>,
}

struct NameTable {
    address: NodeAddress,
    endpoints: RwLock<HashMap<String, Endpoint>>,
}

impl NameTable {
    async fn lookup(&self, name: &str) -> Result<Endpoint> {
        self.endpoints
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ArrayError::NotFound {
                address: self.address.to_string(),
                name: name.to_string(),
            })
    }
}

impl TcpDirectory {
    pub fn new() -> Self {
        Self::with_call_timeout(DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            served: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn client(&self, address: &NodeAddress, name: &str) -> WireClient {
        WireClient {
            address: address.clone(),
            name: name.to_string(),
            call_timeout: self.call_timeout,
        }
    }
}

impl Default for TcpDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for TcpDirectory {
    async fn open(&self, host: &str, port: u16) -> Result<NodeAddress> {
        let listener = match TcpListener::bind((host, port)).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                return Err(ArrayError::AddressInUse(port));
            }
            Err(e) => return Err(e.into()),
        };
        let address = NodeAddress::new(host, listener.local_addr()?.port());

        let names = Arc::new(NameTable {
            address: address.clone(),
            endpoints: RwLock::new(HashMap::new()),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(listener, Arc::clone(&names), shutdown_rx));

        self.served
            .lock()
            .await
            .insert(address.clone(), ServedAddress { names, shutdown });
        info!(%address, "Directory listening");
        Ok(address)
    }

    async fn bind(&self, address: &NodeAddress, name: &str, endpoint: Endpoint) -> Result<()> {
        let served = self.served.lock().await;
        let entry = served
            .get(address)
            .ok_or_else(|| ArrayError::Unreachable(format!("{} is not served here", address)))?;
        entry
            .names
            .endpoints
            .write()
            .await
            .insert(name.to_string(), endpoint);
        Ok(())
    }

    async fn resolve(&self, address: &NodeAddress, name: &str) -> Result<Endpoint> {
        let client = self.client(address, name);
        let kind = match client
            .call(&Request::Lookup {
                name: name.to_string(),
            })
            .await?
        {
            Reply::Kind(kind) => kind,
            other => return Err(wire::unexpected(other)),
        };
        Ok(match kind {
            EndpointKind::Coordinator => Endpoint::Coordinator(Arc::new(RemoteCoordinator { client })),
            EndpointKind::Node => Endpoint::Node(Arc::new(RemoteNode { client })),
            EndpointKind::Board => Endpoint::Board(Arc::new(RemoteBoard { client })),
        })
    }

    async fn close(&self, address: &NodeAddress) -> Result<()> {
        if let Some(entry) = self.served.lock().await.remove(address) {
            entry.names.endpoints.write().await.clear();
            let _ = entry.shutdown.send(true);
            info!(%address, "Directory closed");
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    names: Arc<NameTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "Accepted directory connection");
                    let names = Arc::clone(&names);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, names).await {
                            debug!(%peer, error = %e, "Directory connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Directory accept failed"),
            }
        }
    }
}

async fn serve_connection(socket: TcpStream, names: Arc<NameTable>) -> Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let response = match wire::decode::<Request>(&line) {
            Ok(request) => Response::from(dispatch(&names, request).await),
            Err(e) => Response::Err(e),
        };
        write.write_all(wire::encode(&response)?.as_bytes()).await?;
    }
    Ok(())
}

async fn dispatch(names: &NameTable, request: Request) -> Result<Reply> {
    match request {
        Request::Lookup { name } => Ok(Reply::Kind(names.lookup(&name).await?.kind())),
        Request::Coordinator { name, call } => {
            let api = names.lookup(&name).await?.into_coordinator()?;
            match call {
                CoordinatorCall::Register(node) => api.register_node(node).await.map(Reply::Registration),
                CoordinatorCall::ReportCoreTimeout(report) => {
                    api.report_core_timeout(report).await.map(|_| Reply::Unit)
                }
            }
        }
        Request::Node { name, call } => {
            let admin = names.lookup(&name).await?.into_node()?;
            match call {
                NodeCall::Ping => admin.ping().await.map(Reply::Bool),
                NodeCall::Assign { array, role } => admin.assign(array, role).await.map(|_| Reply::Unit),
                NodeCall::StartService => admin.start_service().await.map(|_| Reply::Unit),
                NodeCall::Unassign { reason } => admin.unassign(reason).await.map(|_| Reply::Unit),
                NodeCall::ArrayDissolved { array_id, reason } => admin
                    .array_dissolved(array_id, reason)
                    .await
                    .map(|_| Reply::Unit),
                NodeCall::Terminate { reason } => admin.terminate(reason).await.map(|_| Reply::Unit),
                NodeCall::Snapshot => admin.snapshot().await.map(Reply::Record),
            }
        }
        Request::Board { name, call } => {
            let board = names.lookup(&name).await?.into_board()?;
            match call {
                BoardCall::Open(array) => board.open_array(array).await.map(|_| Reply::Unit),
                BoardCall::Close(array_id) => board.close_array(array_id).await.map(|_| Reply::Unit),
            }
        }
    }
}

/// One remote name at one address.
#[derive(Clone)]
struct WireClient {
    address: NodeAddress,
    name: String,
    call_timeout: Duration,
}

impl WireClient {
    async fn call(&self, request: &Request) -> Result<Reply> {
        let address = &self.address;
        let exchange = async {
            let stream = TcpStream::connect((address.host.as_str(), address.port))
                .await
                .map_err(|e| ArrayError::Unreachable(format!("{}: {}", address, e)))?;
            let (read, mut write) = stream.into_split();
            write.write_all(wire::encode(request)?.as_bytes()).await?;

            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await?.ok_or_else(|| {
                ArrayError::Unreachable(format!("{} closed the connection", address))
            })?;
            wire::decode::<Response>(&line)?.into_result()
        };
        timeout(self.call_timeout, exchange)
            .await
            .map_err(|_| ArrayError::Timeout(format!("{} did not answer", address)))?
    }

    async fn node(&self, call: NodeCall) -> Result<Reply> {
        self.call(&Request::Node {
            name: self.name.clone(),
            call,
        })
        .await
    }

    async fn unit(&self, request: Request) -> Result<()> {
        match self.call(&request).await? {
            Reply::Unit => Ok(()),
            other => Err(wire::unexpected(other)),
        }
    }
}

struct RemoteNode {
    client: WireClient,
}

impl RemoteNode {
    async fn unit(&self, call: NodeCall) -> Result<()> {
        match self.client.node(call).await? {
            Reply::Unit => Ok(()),
            other => Err(wire::unexpected(other)),
        }
    }
}

#[async_trait]
impl NodeAdmin for RemoteNode {
    async fn ping(&self) -> Result<bool> {
        match self.client.node(NodeCall::Ping).await? {
            Reply::Bool(alive) => Ok(alive),
            other => Err(wire::unexpected(other)),
        }
    }

    async fn assign(&self, array: Array, role: String) -> Result<()> {
        self.unit(NodeCall::Assign { array, role }).await
    }

    async fn start_service(&self) -> Result<()> {
        self.unit(NodeCall::StartService).await
    }

    async fn unassign(&self, reason: String) -> Result<()> {
        self.unit(NodeCall::Unassign { reason }).await
    }

    async fn array_dissolved(&self, array_id: ArrayId, reason: String) -> Result<()> {
        self.unit(NodeCall::ArrayDissolved { array_id, reason }).await
    }

    async fn terminate(&self, reason: String) -> Result<()> {
        self.unit(NodeCall::Terminate { reason }).await
    }

    async fn snapshot(&self) -> Result<NodeRecord> {
        match self.client.node(NodeCall::Snapshot).await? {
            Reply::Record(record) => Ok(record),
            other => Err(wire::unexpected(other)),
        }
    }
}

struct RemoteCoordinator {
    client: WireClient,
}

#[async_trait]
impl CoordinatorApi for RemoteCoordinator {
    async fn register_node(&self, node: NodeRecord) -> Result<Registration> {
        let request = Request::Coordinator {
            name: self.client.name.clone(),
            call: CoordinatorCall::Register(node),
        };
        match self.client.call(&request).await? {
            Reply::Registration(registration) => Ok(registration),
            other => Err(wire::unexpected(other)),
        }
    }

    async fn report_core_timeout(&self, report: CoreTimeoutReport) -> Result<()> {
        self.client
            .unit(Request::Coordinator {
                name: self.client.name.clone(),
                call: CoordinatorCall::ReportCoreTimeout(report),
            })
            .await
    }
}

struct RemoteBoard {
    client: WireClient,
}

#[async_trait]
impl ArrayListener for RemoteBoard {
    async fn open_array(&self, array: Array) -> Result<()> {
        self.client
            .unit(Request::Board {
                name: self.client.name.clone(),
                call: BoardCall::Open(array),
            })
            .await
    }

    async fn close_array(&self, array_id: ArrayId) -> Result<()> {
        self.client
            .unit(Request::Board {
                name: self.client.name.clone(),
                call: BoardCall::Close(array_id),
            })
            .await
    }
}
