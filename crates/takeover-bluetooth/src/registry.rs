//! Cache of acquired profile handles.

use std::collections::BTreeMap;
use std::sync::Arc;

use takeover_core::{ProfileKind, Result};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapter::{ProfileHandle, SystemAdapter};

/// Acquires each profile once and hands out shared handles.
///
/// A handle that reports itself unavailable is reacquired on next use.
pub struct ProfileRegistry {
    adapter: Arc<dyn SystemAdapter>,
    handles: Mutex<BTreeMap<ProfileKind, Arc<dyn ProfileHandle>>>,
}

impl ProfileRegistry {
    pub fn new(adapter: Arc<dyn SystemAdapter>) -> Self {
        Self {
            adapter,
            handles: Mutex::new(BTreeMap::new()),
        }
    }

    /// Get the handle for `kind`, acquiring it if needed.
    pub async fn get(&self, kind: ProfileKind) -> Result<Arc<dyn ProfileHandle>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&kind) {
            if handle.is_available().await {
                return Ok(Arc::clone(handle));
            }
            debug!("{} profile handle went away, reacquiring", kind);
            handles.remove(&kind);
        }

        let handle = self.adapter.acquire_profile(kind).await?;
        handles.insert(kind, Arc::clone(&handle));
        Ok(handle)
    }

    /// Handles for every obtainable profile in `kinds`, keeping their order.
    ///
    /// Profiles that cannot be acquired are skipped.
    pub async fn available(&self, kinds: &[ProfileKind]) -> Vec<Arc<dyn ProfileHandle>> {
        let mut result = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match self.get(*kind).await {
                Ok(handle) => result.push(handle),
                Err(e) => warn!("{} profile unavailable: {}", kind, e),
            }
        }
        result
    }

    /// Drop every cached handle.
    pub async fn release_all(&self) {
        let mut handles = self.handles.lock().await;
        debug!("Releasing {} profile handles", handles.len());
        handles.clear();
    }

    pub async fn cached(&self) -> usize {
        self.handles.lock().await.len()
    }
}
