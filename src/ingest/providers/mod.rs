// src/ingest/providers/mod.rs
pub mod anilibria;
pub mod rss;
