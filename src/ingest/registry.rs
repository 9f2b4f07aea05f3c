// src/ingest/registry.rs
use std::sync::Arc;

use crate::config::{options_as, SourceConfig};
use crate::ingest::providers::anilibria::{AnilibriaOptions, AnilibriaSource};
use crate::ingest::providers::rss::{RssOptions, RssSource};
use crate::ingest::types::SourceAdapter;
use crate::registry::Registry;

pub type SourceRegistry = Registry<SourceConfig, dyn SourceAdapter>;

/// Registry with every adapter shipped in this crate.
pub fn builtin_sources() -> SourceRegistry {
    let mut reg = SourceRegistry::empty("source");
    reg.register("rss", |cfg: &SourceConfig| {
        let opts: RssOptions = options_as(&cfg.options)?;
        Ok(Arc::new(RssSource::from_url(&cfg.endpoint, opts)?) as Arc<dyn SourceAdapter>)
    });
    reg.register("anilibria", |cfg: &SourceConfig| {
        let opts: AnilibriaOptions = options_as(&cfg.options)?;
        Ok(Arc::new(AnilibriaSource::new(&cfg.endpoint, opts)?) as Arc<dyn SourceAdapter>)
    });
    reg
}
