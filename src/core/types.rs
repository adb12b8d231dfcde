use super::error::{ArrayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier issued by the coordinator on first contact.
///
/// Never reassigned: a node keeps it across unassign/re-register cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ArrayError::Protocol(format!("Invalid node id '{}': {}", s, e)))
    }
}

/// A directory address: the (host, port) pair a process serves its endpoints on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Same host, different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host.clone(), port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = ArrayError;

    /// Parses `host:port`.
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ArrayError::Config(format!("Address '{}' must be host:port", s)))?;
        if host.is_empty() {
            return Err(ArrayError::Config(format!("Address '{}' has no host", s)));
        }
        let port = port
            .parse()
            .map_err(|_| ArrayError::Config(format!("Invalid port in address '{}'", s)))?;
        Ok(Self::new(host, port))
    }
}

/// Snapshot of a node's identity as exchanged between coordinator and nodes.
///
/// This is a plain value; the live, mutable side of a node is `NodeService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: Option<NodeId>,
    pub address: NodeAddress,
    pub role: Option<String>,
}

impl NodeRecord {
    /// A node that has not been in contact with any coordinator yet.
    pub fn unbound(address: NodeAddress) -> Self {
        Self {
            id: None,
            address,
            role: None,
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// The same node with its role cleared, as it sits in the unassigned pool.
    pub fn unassigned(mut self) -> Self {
        self.role = None;
        self
    }

    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("{}@{}", id, self.address),
            None => format!("<unregistered>@{}", self.address),
        }
    }
}

/// Lifecycle of a node process.
///
/// `Unbound → Registered → Assigned → Servicing → [HealthCheckFailed] →
/// Unassigned → Registered`, with `Terminated` reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Unbound,
    Registered,
    Assigned,
    Servicing,
    HealthCheckFailed,
    Unassigned,
    Terminated,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unbound => "unbound",
            Self::Registered => "registered",
            Self::Assigned => "assigned",
            Self::Servicing => "servicing",
            Self::HealthCheckFailed => "health-check-failed",
            Self::Unassigned => "unassigned",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What the coordinator hands back to a registering node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// The authoritative record; `id` is always set.
    pub node: NodeRecord,
    /// Where the coordinator can be reached for failure reports.
    pub coordinator: NodeAddress,
}

/// Sent by a non-core member when its core stopped answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreTimeoutReport {
    pub array_id: crate::array::ArrayId,
    pub core: NodeAddress,
    pub reporter: NodeAddress,
    pub reported_at: DateTime<Utc>,
}

impl fmt::Display for CoreTimeoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "core {} of array {} timed out (reported by {} at {})",
            self.core,
            self.array_id,
            self.reporter,
            self.reported_at.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let addr: NodeAddress = "10.0.0.7:1181".parse().unwrap();
        assert_eq!(addr, NodeAddress::new("10.0.0.7", 1181));
        assert_eq!(addr.to_string(), "10.0.0.7:1181");
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!("localhost".parse::<NodeAddress>().is_err());
        assert!(":1180".parse::<NodeAddress>().is_err());
        assert!("localhost:notaport".parse::<NodeAddress>().is_err());
        assert!("localhost:70000".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_unassigned_clears_role_only() {
        let id = NodeId::new();
        let record = NodeRecord::unbound(NodeAddress::new("127.0.0.1", 1180))
            .with_id(id)
            .with_role("Worker")
            .unassigned();
        assert_eq!(record.id, Some(id));
        assert_eq!(record.role, None);
    }
}
