use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::ScanError;
use crate::types::{ScanId, ScanRecord};

/// In-memory store of scan records.
///
/// Records never leave the registry by reference: `get` and `snapshot` hand out
/// clones and `update` runs a closure under the write guard. Readers only
/// contend with the short write sections, never with a running scan.
#[derive(Debug, Default)]
pub struct ScanRegistry {
    scans: RwLock<HashMap<ScanId, ScanRecord>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, record: ScanRecord) -> Result<(), ScanError> {
        let mut scans = self.scans.write().await;
        if scans.contains_key(&record.id) {
            return Err(ScanError::DuplicateId(record.id));
        }
        scans.insert(record.id, record);
        Ok(())
    }

    pub async fn get(&self, id: &ScanId) -> Option<ScanRecord> {
        self.scans.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &ScanId) -> bool {
        self.scans.read().await.contains_key(id)
    }

    /// Apply `mutation` to the record in place. Returns `None` for unknown ids.
    pub async fn update<R>(
        &self,
        id: &ScanId,
        mutation: impl FnOnce(&mut ScanRecord) -> R,
    ) -> Option<R> {
        let mut scans = self.scans.write().await;
        scans.get_mut(id).map(mutation)
    }

    pub async fn delete(&self, id: &ScanId) -> Option<ScanRecord> {
        self.scans.write().await.remove(id)
    }

    pub async fn snapshot(&self) -> Vec<ScanRecord> {
        self.scans.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.scans.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
