// src/store/mod.rs
//! Persisted "seen" state, one mapping of item identity → record per source.

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ingest::types::{Item, ItemMeta};

pub use file::FileStore;
pub use memory::MemoryStore;

/// What the store remembers about one item of one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenRecord {
    pub id: String,
    pub first_seen_cycle: u64,
    pub last_seen_cycle: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub meta: ItemMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl SeenRecord {
    pub fn first_sighting(item: &Item, cycle: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: item.id.clone(),
            first_seen_cycle: cycle,
            last_seen_cycle: cycle,
            first_seen_at: now,
            last_seen_at: now,
            meta: item.meta.clone(),
            payload: item.payload.clone(),
        }
    }

    /// New metadata snapshot; first-seen bookkeeping is kept.
    pub fn updated(&self, item: &Item, cycle: u64, now: DateTime<Utc>) -> Self {
        Self {
            meta: item.meta.clone(),
            payload: item.payload.clone(),
            last_seen_cycle: cycle,
            last_seen_at: now,
            ..self.clone()
        }
    }

    /// Same snapshot, seen again.
    pub fn touched(&self, cycle: u64, now: DateTime<Utc>) -> Self {
        Self {
            last_seen_cycle: cycle,
            last_seen_at: now,
            ..self.clone()
        }
    }
}

/// Records to merge for one source at the end of a cycle.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub upserts: Vec<SeenRecord>,
    /// Retention: drop records last seen before this instant.
    pub prune_before: Option<DateTime<Utc>>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.prune_before.is_none()
    }
}

/// Per-source persisted state. `commit` is all-or-nothing.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, source_id: &str) -> Result<HashMap<String, SeenRecord>, StoreError>;
    async fn commit(&self, source_id: &str, batch: CommitBatch) -> Result<(), StoreError>;
}

/// Merge `batch` into `records` in place. Returns how many records retention removed.
pub(crate) fn apply_batch(records: &mut HashMap<String, SeenRecord>, batch: CommitBatch) -> usize {
    for rec in batch.upserts {
        records.insert(rec.id.clone(), rec);
    }
    match batch.prune_before {
        Some(cutoff) => {
            let before = records.len();
            records.retain(|_, r| r.last_seen_at >= cutoff);
            before - records.len()
        }
        None => 0,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_state_dir")]
    pub path: PathBuf,
    #[serde(default)]
    pub retention_days: Option<u64>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_state_dir(),
            retention_days: None,
        }
    }
}

/// Open the configured backend. Failure here is fatal at startup.
pub async fn open(cfg: &StoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    match cfg.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => Ok(Arc::new(FileStore::open(&cfg.path).await?)),
    }
}
