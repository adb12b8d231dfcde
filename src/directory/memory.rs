use super::{Directory, Endpoint};
use crate::core::{ArrayError, NodeAddress, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// An in-process `Directory`.
///
/// All coordinator and node services sharing one instance see each other as
/// if they were separate processes. Handles resolve to the service objects
/// directly, so calls cost nothing beyond the lookup.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    addresses: Arc<Mutex<HashMap<NodeAddress, HashMap<String, Endpoint>>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `address` unreachable without telling whoever serves it,
    /// the way a crashed process or a cut link looks to its peers.
    pub async fn disconnect(&self, address: &NodeAddress) -> bool {
        let removed = self.addresses.lock().await.remove(address).is_some();
        if removed {
            debug!(%address, "Directory address disconnected");
        }
        removed
    }

    pub async fn is_open(&self, address: &NodeAddress) -> bool {
        self.addresses.lock().await.contains_key(address)
    }

    /// Names bound at `address`, sorted.
    pub async fn names(&self, address: &NodeAddress) -> Vec<String> {
        let addresses = self.addresses.lock().await;
        let mut names = addresses
            .get(address)
            .map(|names| names.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn open(&self, host: &str, port: u16) -> Result<NodeAddress> {
        if host.trim().is_empty() {
            return Err(ArrayError::Config("host must not be empty".to_string()));
        }
        let address = NodeAddress::new(host, port);
        let mut addresses = self.addresses.lock().await;
        if addresses.contains_key(&address) {
            return Err(ArrayError::AddressInUse(port));
        }
        addresses.insert(address.clone(), HashMap::new());
        Ok(address)
    }

    async fn bind(&self, address: &NodeAddress, name: &str, endpoint: Endpoint) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ArrayError::Config("endpoint name must not be empty".to_string()));
        }
        let mut addresses = self.addresses.lock().await;
        let names = addresses
            .get_mut(address)
            .ok_or_else(|| ArrayError::Unreachable(address.to_string()))?;
        names.insert(name.to_string(), endpoint);
        Ok(())
    }

    async fn resolve(&self, address: &NodeAddress, name: &str) -> Result<Endpoint> {
        let addresses = self.addresses.lock().await;
        let names = addresses
            .get(address)
            .ok_or_else(|| ArrayError::Unreachable(address.to_string()))?;
        names.get(name).cloned().ok_or_else(|| ArrayError::NotFound {
            address: address.to_string(),
            name: name.to_string(),
        })
    }

    async fn close(&self, address: &NodeAddress) -> Result<()> {
        self.addresses.lock().await.remove(address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Array, ArrayId};
    use crate::directory::{ArrayListener, ARRAY_BOARD_ENDPOINT};

    struct NullBoard;

    #[async_trait]
    impl ArrayListener for NullBoard {
        async fn open_array(&self, _array: Array) -> Result<()> {
            Ok(())
        }

        async fn close_array(&self, _array_id: ArrayId) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_open_twice_is_address_in_use() {
        let dir = InMemoryDirectory::new();
        dir.open("127.0.0.1", 1180).await.unwrap();
        let err = dir.open("127.0.0.1", 1180).await.unwrap_err();
        assert_eq!(err, ArrayError::AddressInUse(1180));
        dir.open("127.0.0.2", 1180).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_failures() {
        let dir = InMemoryDirectory::new();
        let addr = dir.open("127.0.0.1", 1180).await.unwrap();

        let err = dir.resolve(&addr, ARRAY_BOARD_ENDPOINT).await.unwrap_err();
        assert!(matches!(err, ArrayError::NotFound { .. }));

        let elsewhere = NodeAddress::new("127.0.0.1", 1181);
        let err = dir.resolve(&elsewhere, ARRAY_BOARD_ENDPOINT).await.unwrap_err();
        assert!(matches!(err, ArrayError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_disconnect_hides_bound_names() {
        let dir = InMemoryDirectory::new();
        let addr = dir.open("127.0.0.1", 1180).await.unwrap();
        dir.bind(&addr, ARRAY_BOARD_ENDPOINT, Endpoint::Board(Arc::new(NullBoard)))
            .await
            .unwrap();
        assert_eq!(dir.names(&addr).await, vec![ARRAY_BOARD_ENDPOINT]);
        assert!(dir.resolve_board(&addr).await.is_ok());
        assert!(dir.resolve_node(&addr).await.is_err());

        assert!(dir.disconnect(&addr).await);
        assert!(!dir.is_open(&addr).await);
        assert!(dir.resolve_board(&addr).await.err().is_some_and(|e| e.is_unreachable()));
    }
}
