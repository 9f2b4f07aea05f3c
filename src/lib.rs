// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod config;
pub mod error;
pub mod registry;

// Sources, change detection, state
pub mod dedup;
pub mod ingest;
pub mod store;

// Notifications & delivery
pub mod dispatch;
pub mod history;
pub mod notify;
pub mod report;

// Running engine
pub mod cycle;
pub mod engine;
pub mod scheduler;
pub mod status;

// Operator surface
pub mod api;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::AppConfig;
pub use crate::dedup::{detect_changes, ChangeEvent, ChangeKind};
pub use crate::engine::{Engine, RunningEngine};
pub use crate::error::{ConfigError, CycleError, DeliveryError, SourceError, StoreError};
pub use crate::ingest::registry::{builtin_sources, SourceRegistry};
pub use crate::ingest::types::{Item, ItemMeta, SourceAdapter};
pub use crate::notify::registry::{builtin_sinks, SinkRegistry};
pub use crate::notify::{Message, NotificationSink};
