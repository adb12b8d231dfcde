pub mod error;
pub mod types;

pub use error::{ArrayError, Result};
pub use types::{CoreTimeoutReport, NodeAddress, NodeId, NodeRecord, NodeState, Registration};
