use crate::array::{Array, ArrayId};
use crate::core::Result;
use crate::directory::ArrayListener;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Client-facing list of arrays that are open for business.
#[derive(Clone, Default)]
pub struct ArrayBoard {
    open: Arc<RwLock<Vec<Array>>>,
}

impl ArrayBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_arrays(&self) -> Vec<Array> {
        self.open.read().await.clone()
    }

    pub async fn is_open(&self, array_id: &ArrayId) -> bool {
        self.open.read().await.iter().any(|a| a.id() == *array_id)
    }
}

#[async_trait]
impl ArrayListener for ArrayBoard {
    async fn open_array(&self, array: Array) -> Result<()> {
        let mut open = self.open.write().await;
        if !open.iter().any(|a| a.id() == array.id()) {
            info!(array = %array.id(), "Array open to clients");
            open.push(array);
        }
        Ok(())
    }

    async fn close_array(&self, array_id: ArrayId) -> Result<()> {
        let mut open = self.open.write().await;
        let before = open.len();
        open.retain(|a| a.id() != array_id);
        if open.len() != before {
            info!(array = %array_id, "Array closed to clients");
        }
        Ok(())
    }
}
