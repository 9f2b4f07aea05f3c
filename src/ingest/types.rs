// src/ingest/types.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Display metadata compared field-wise by the dedup engine.
/// `extra` is a sorted map so comparison never depends on insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ItemMeta {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<u64>, // unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>, // bytes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ItemMeta {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// One unit discovered on a source during a poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    /// Stable key: guid, canonical URL or content hash.
    pub id: String,
    pub meta: ItemMeta,
    /// Raw payload reference, e.g. a .torrent download link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<String>, meta: ItemMeta) -> Self {
        Self {
            id: id.into(),
            meta,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// A tracker or feed the scheduler can poll.
///
/// Implementations must be read-only towards the remote side. The scheduler
/// enforces the per-call timeout, so `fetch` may simply await the network.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError>;
    fn kind(&self) -> &'static str;
}
