// src/ingest/mod.rs
pub mod providers;
pub mod registry;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;

use crate::ingest::types::SourceAdapter;

/// A configured source as the scheduler sees it. Immutable for the lifetime
/// of an engine; a reload builds fresh ones.
#[derive(Clone)]
pub struct TrackedSource {
    pub id: String,
    pub endpoint: String,
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub enabled: bool,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl std::fmt::Debug for TrackedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedSource")
            .field("id", &self.id)
            .field("kind", &self.adapter.kind())
            .field("endpoint", &self.endpoint)
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Items parsed from source adapters.");
        describe_counter!(
            "ingest_duplicate_ids_total",
            "Items dropped because the same fetch already contained their id."
        );
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_histogram!("ingest_fetch_ms", "Adapter fetch time (network and parse) in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 4) Length cap: 512 chars (titles only)
    if out.chars().count() > 512 {
        out = out.chars().take(512).collect();
    }

    out
}

/// Hex SHA-256 of `text`, shortened to `bytes` bytes.
pub fn content_hash(text: &str, bytes: usize) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(bytes * 2);
    for b in digest.iter().take(bytes) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
