// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// A state store that does not persist across restarts. Useful for tests
// and for containerized deployments where restarting a rollover from
// Idle is acceptable.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - The first tick after a restart re-creates every status from scratch,
//   which may repeat the pre-publish step of an interrupted rollover

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::status::RollerState;
use crate::traits::state_store::StateStore;
use async_trait::async_trait;

/// In-memory state store implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<RollerState>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of zones in the held snapshot
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store holds no zones
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<RollerState, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, state: &RollerState) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        *guard = state.clone();
        Ok(())
    }
}
