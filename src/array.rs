//! Formed groups ("arrays").
//!
//! An `Array` only exists complete: `ArrayBuilder` refuses to produce one while
//! any required role is still empty.

use crate::core::{ArrayError, NodeAddress, NodeId, NodeRecord, Result};
use crate::shard::CORE_ROLE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArrayId(Uuid);

impl ArrayId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArrayId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ArrayId {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ArrayError::Protocol(format!("Invalid array id '{}': {}", s, e)))
    }
}

/// A complete group: exactly one node per required role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Array {
    id: ArrayId,
    members: BTreeMap<String, NodeRecord>,
    coordinator: NodeAddress,
    formed_at: DateTime<Utc>,
}

impl Array {
    pub fn id(&self) -> ArrayId {
        self.id
    }

    /// Node holding `role`, if the role is part of this array.
    pub fn member(&self, role: &str) -> Option<&NodeRecord> {
        self.members.get(role)
    }

    /// The leader. Always present in a built array.
    pub fn core(&self) -> Option<&NodeRecord> {
        self.member(CORE_ROLE)
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &NodeRecord)> {
        self.members.iter().map(|(role, node)| (role.as_str(), node))
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.members.values().any(|n| n.id.as_ref() == Some(node_id))
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members.values().filter_map(|n| n.id).collect()
    }

    pub fn coordinator(&self) -> &NodeAddress {
        &self.coordinator
    }

    pub fn formed_at(&self) -> DateTime<Utc> {
        self.formed_at
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array {} [", self.id)?;
        for (i, (role, node)) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", role, node.address)?;
        }
        write!(f, "]")
    }
}

/// An array being formed. Never visible outside the formation task.
#[derive(Debug)]
pub struct ArrayBuilder {
    id: ArrayId,
    required: Vec<String>,
    members: BTreeMap<String, NodeRecord>,
    coordinator: NodeAddress,
}

impl ArrayBuilder {
    pub fn new(coordinator: NodeAddress, required: Vec<String>) -> Self {
        Self {
            id: ArrayId::new(),
            required,
            members: BTreeMap::new(),
            coordinator,
        }
    }

    pub fn id(&self) -> ArrayId {
        self.id
    }

    /// Puts `node` into the `role` slot, stamping the role onto the record.
    pub fn assign(&mut self, role: &str, node: NodeRecord) -> Result<()> {
        if !self.required.iter().any(|r| r == role) {
            return Err(ArrayError::InvalidRoleSet(format!(
                "role '{}' is not part of this array",
                role
            )));
        }
        if self.members.contains_key(role) {
            return Err(ArrayError::InvalidRoleSet(format!(
                "role '{}' is already filled",
                role
            )));
        }
        self.members.insert(role.to_string(), node.with_role(role));
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.required.iter().all(|r| self.members.contains_key(r))
    }

    pub fn missing_roles(&self) -> Vec<&str> {
        self.required
            .iter()
            .filter(|r| !self.members.contains_key(*r))
            .map(String::as_str)
            .collect()
    }

    pub fn build(self) -> Result<Array> {
        if !self.is_complete() {
            return Err(ArrayError::InvalidRoleSet(format!(
                "array {} is missing roles: {}",
                self.id,
                self.missing_roles().join(", ")
            )));
        }
        Ok(Array {
            id: self.id,
            members: self.members,
            coordinator: self.coordinator,
            formed_at: Utc::now(),
        })
    }
}
