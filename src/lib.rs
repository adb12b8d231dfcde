// ============================================================================
// Shardlot Library
// ============================================================================

//! Self-forming node arrays.
//!
//! A query service (`Coordinator`) keeps a pool of registered nodes and, as
//! soon as the pool can cover every required role, forms an `Array` with one
//! node per role. The member holding the `Core` role is the array's leader;
//! every other member watches it and returns to the pool when it goes quiet.
//!
//! ```no_run
//! use shardlot::{Coordinator, CoordinatorConfig, InMemoryDirectory, NodeConfig, NodeService, ShardSet};
//! use std::sync::Arc;
//!
//! # async fn demo() -> shardlot::Result<()> {
//! let directory = Arc::new(InMemoryDirectory::new());
//! let roles = ShardSet::from_roles(["Worker"])?;
//! let coordinator = Coordinator::start(CoordinatorConfig::new(), directory.clone(), roles.clone()).await?;
//!
//! let config = NodeConfig::new(coordinator.address().clone()).port(1181);
//! let worker = NodeService::launch(config.clone(), directory.clone(), roles.clone()).await?;
//! let core = NodeService::launch(config, directory, roles).await?;
//! # Ok(())
//! # }
//! ```

pub mod array;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod core;
pub mod directory;
pub mod node;
pub mod shard;

// Re-export main types for convenience
pub use array::{Array, ArrayBuilder, ArrayId};
pub use config::{CoordinatorConfig, DEFAULT_PORT, DEFAULT_PORT_ATTEMPTS, NodeConfig};
pub use console::ConsoleCommand;
pub use coordinator::{ArrayBoard, Census, Coordinator, CoordinatorEvent, ShutdownReport};
pub use core::{
    ArrayError, CoreTimeoutReport, NodeAddress, NodeId, NodeRecord, NodeState, Registration, Result,
};
pub use directory::{
    ArrayListener, CoordinatorApi, Directory, Endpoint, InMemoryDirectory, NodeAdmin, TcpDirectory,
    open_with_fallback,
};
pub use node::{CORE_TIMEOUT_REASON, NodeService};
pub use shard::{CORE_ROLE, CoreShard, NamedShard, Shard, ShardSet};
