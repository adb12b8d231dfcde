//! Role descriptors.
//!
//! A `Shard` names a role and carries the start-up hook the node runs once it
//! is wired into an array. The `Core` role is always part of a `ShardSet`.

use crate::array::Array;
use crate::core::{ArrayError, NodeRecord, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Name of the mandatory leader role.
pub const CORE_ROLE: &str = "Core";

#[async_trait]
pub trait Shard: Send + Sync {
    /// Role name, unique within a `ShardSet`.
    fn role(&self) -> &str;

    /// Invoked exactly once per assignment, after the node's array and role are set.
    async fn start_shard(&self, array: &Array, node: &NodeRecord) -> Result<()>;
}

/// The built-in leader role.
#[derive(Debug, Default, Clone)]
pub struct CoreShard;

#[async_trait]
impl Shard for CoreShard {
    fn role(&self) -> &str {
        CORE_ROLE
    }

    async fn start_shard(&self, array: &Array, node: &NodeRecord) -> Result<()> {
        info!(
            array = %array.id(),
            members = array.len(),
            address = %node.address,
            "Core shard online"
        );
        Ok(())
    }
}

/// A role with no behavior beyond announcing itself.
///
/// Used by the binary for roles named on the command line.
#[derive(Debug, Clone)]
pub struct NamedShard {
    role: String,
}

impl NamedShard {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl Shard for NamedShard {
    fn role(&self) -> &str {
        &self.role
    }

    async fn start_shard(&self, array: &Array, node: &NodeRecord) -> Result<()> {
        let core = array
            .core()
            .map(|c| c.address.to_string())
            .unwrap_or_default();
        info!(
            role = %self.role,
            array = %array.id(),
            core = %core,
            address = %node.address,
            "Shard started"
        );
        Ok(())
    }
}

/// The required-role set. Immutable once built.
#[derive(Clone)]
pub struct ShardSet {
    shards: Vec<Arc<dyn Shard>>,
}

impl ShardSet {
    /// Builds a role set from caller-supplied (non-leader) roles, appending the
    /// core role unless the caller already supplied one.
    pub fn new(shards: Vec<Arc<dyn Shard>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for shard in &shards {
            let role = shard.role();
            if role.trim().is_empty() {
                return Err(ArrayError::InvalidRoleSet(
                    "role name must not be empty".to_string(),
                ));
            }
            if !seen.insert(role.to_string()) {
                return Err(ArrayError::InvalidRoleSet(format!(
                    "duplicate role '{}'",
                    role
                )));
            }
        }

        let mut shards = shards;
        if !seen.contains(CORE_ROLE) {
            shards.push(Arc::new(CoreShard));
        }
        Ok(Self { shards })
    }

    /// Convenience for role sets whose shards have no custom behavior.
    pub fn from_roles<I, S>(roles: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let shards = roles
            .into_iter()
            .map(|r| Arc::new(NamedShard::new(r)) as Arc<dyn Shard>)
            .collect();
        Self::new(shards)
    }

    /// Only the core role.
    pub fn core_only() -> Self {
        Self {
            shards: vec![Arc::new(CoreShard)],
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn roles(&self) -> Vec<String> {
        self.shards.iter().map(|s| s.role().to_string()).collect()
    }

    pub fn get(&self, role: &str) -> Option<Arc<dyn Shard>> {
        self.shards.iter().find(|s| s.role() == role).cloned()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.shards.iter().any(|s| s.role() == role)
    }
}

impl fmt::Debug for ShardSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardSet")
            .field("roles", &self.roles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_is_injected() {
        let set = ShardSet::from_roles(["Worker", "Cache"]).unwrap();
        assert_eq!(set.roles(), vec!["Worker", "Cache", CORE_ROLE]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_caller_core_is_not_duplicated() {
        let set = ShardSet::from_roles([CORE_ROLE, "Worker"]).unwrap();
        assert_eq!(set.roles(), vec![CORE_ROLE, "Worker"]);
    }

    #[test]
    fn test_empty_input_still_has_core() {
        let set = ShardSet::from_roles(Vec::<String>::new()).unwrap();
        assert_eq!(set.roles(), vec![CORE_ROLE]);
        assert_eq!(set.roles(), ShardSet::core_only().roles());
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let err = ShardSet::from_roles(["Worker", "Worker"]).unwrap_err();
        assert!(matches!(err, ArrayError::InvalidRoleSet(_)));
        assert!(ShardSet::from_roles([" "]).is_err());
    }
}
