use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayError {
    #[error("Peer unreachable at {0}")]
    Unreachable(String),

    #[error("Name '{name}' is not bound at {address}")]
    NotFound { address: String, name: String },

    #[error("Port {0} already in use")]
    AddressInUse(u16),

    #[error("Unable to bind a directory port in {first}..={last}")]
    PortRangeExhausted { first: u16, last: u16 },

    #[error("Invalid role set: {0}")]
    InvalidRoleSet(String),

    #[error("Node is not assigned to an array")]
    NotAssigned,

    #[error("Endpoint '{0}' has the wrong kind")]
    WrongEndpoint(String),

    #[error("Can't connect to coordinator at {address}: {reason}")]
    CoordinatorUnreachable { address: String, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node terminated: {0}")]
    Terminated(String),
}

impl ArrayError {
    /// True for failures that mean "the peer could not be reached or does not
    /// answer under that name". These drive the protocol recovery paths.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_)
                | Self::NotFound { .. }
                | Self::Timeout(_)
                | Self::IoError(_)
                | Self::Terminated(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ArrayError>;

impl From<std::io::Error> for ArrayError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ArrayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ArrayError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}
