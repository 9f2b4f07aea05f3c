// src/store/memory.rs
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StoreError;

use super::{apply_batch, CommitBatch, SeenRecord, StateStore};

/// Process-local store. Commits build the new mapping aside and swap it in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, HashMap<String, SeenRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a source's records (tests, imports).
    pub fn seed(&self, source_id: &str, records: impl IntoIterator<Item = SeenRecord>) {
        let mut guard = self.inner.lock().expect("memory store mutex poisoned");
        let map = guard.entry(source_id.to_string()).or_default();
        for r in records {
            map.insert(r.id.clone(), r);
        }
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, source_id: &str) -> Result<HashMap<String, SeenRecord>, StoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::unavailable("memory store mutex poisoned"))?;
        Ok(guard.get(source_id).cloned().unwrap_or_default())
    }

    async fn commit(&self, source_id: &str, batch: CommitBatch) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::unavailable("memory store mutex poisoned"))?;
        let mut next = guard.get(source_id).cloned().unwrap_or_default();
        apply_batch(&mut next, batch);
        guard.insert(source_id.to_string(), next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{Item, ItemMeta};

    #[tokio::test]
    async fn commit_then_get_roundtrip_per_source() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();
        let rec = SeenRecord::first_sighting(&Item::new("x1", ItemMeta::titled("v1")), 1, now);

        store
            .commit(
                "a",
                CommitBatch {
                    upserts: vec![rec.clone()],
                    prune_before: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap().get("x1"), Some(&rec));
        assert!(store.get("b").await.unwrap().is_empty());
    }
}
