// src/dedup.rs
//! # Deduplication Engine
//! Pure comparison of one fresh fetch against the source's seen records.
//! No I/O. Items missing from a fetch are never reported: absence from a feed
//! is not proof the item is gone.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ingest::content_hash;
use crate::ingest::types::Item;
use crate::store::SeenRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Updated,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::New => f.write_str("new"),
            ChangeKind::Updated => f.write_str("updated"),
        }
    }
}

/// A detected new-or-updated item. `event_id` is derived from the source, the
/// item id and its metadata, so regenerating the same change yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub source_id: String,
    pub kind: ChangeKind,
    pub item: Item,
}

impl ChangeEvent {
    pub fn new(source_id: &str, kind: ChangeKind, item: Item) -> Self {
        Self {
            event_id: event_id(source_id, &item),
            source_id: source_id.to_string(),
            kind,
            item,
        }
    }
}

/// Stable identity of one (source, item, metadata) observation.
pub fn event_id(source_id: &str, item: &Item) -> String {
    let meta = serde_json::to_string(&item.meta).unwrap_or_default();
    content_hash(&format!("{source_id}\u{1f}{}\u{1f}{meta}", item.id), 12)
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// In fetch order.
    pub events: Vec<ChangeEvent>,
    /// Ids seen again with identical metadata.
    pub unchanged: Vec<String>,
    /// Repeated ids within the same fetch (first occurrence kept).
    pub duplicates: usize,
}

/// Compare a fresh fetch with prior records: `New` when the id is unknown,
/// `Updated` when the metadata differs, nothing otherwise.
pub fn detect_changes(
    source_id: &str,
    fresh: &[Item],
    prior: &HashMap<String, SeenRecord>,
) -> DedupOutcome {
    let mut out = DedupOutcome::default();
    let mut seen_ids: HashSet<&str> = HashSet::with_capacity(fresh.len());

    for item in fresh {
        if !seen_ids.insert(item.id.as_str()) {
            tracing::debug!(target: "ingest", source = source_id, id = %item.id, "duplicate id in fetch");
            out.duplicates += 1;
            continue;
        }
        match prior.get(&item.id) {
            None => out
                .events
                .push(ChangeEvent::new(source_id, ChangeKind::New, item.clone())),
            Some(rec) if rec.meta != item.meta => out
                .events
                .push(ChangeEvent::new(source_id, ChangeKind::Updated, item.clone())),
            Some(_) => out.unchanged.push(item.id.clone()),
        }
    }
    out
}
