use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::models::{LightSnapshot, OpticsReading};

/// Holds the latest completed fan-out cycle.
///
/// Cycles replace the snapshot wholesale; readers clone the current value
/// and never observe a partially-written cycle.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<Option<LightSnapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Publishes a finished cycle, replacing whatever was there.
    pub async fn publish(&self, snapshot: LightSnapshot) {
        let mut guard = self.inner.write().await;
        *guard = Some(snapshot);
    }

    /// The latest snapshot, if any cycle has completed yet.
    pub async fn latest(&self) -> Option<LightSnapshot> {
        self.inner.read().await.clone()
    }
}

/// SHA-256 hex digest over the serialized readings. Pollers compare digests
/// across cycles to detect change without diffing reading lists.
pub fn readings_digest(readings: &[OpticsReading]) -> String {
    let serialized = serde_json::to_string(readings).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}
