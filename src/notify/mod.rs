// src/notify/mod.rs
pub mod discord;
pub mod email;
pub mod log;
pub mod registry;
pub mod slack;
pub mod telegram;
pub mod transmission;

use anyhow::Result;
use serde::Serialize;

use crate::dedup::{ChangeEvent, ChangeKind};

/// What a sink delivers. Sinks may de-duplicate on `id`: a regenerated change
/// (after a crash or failed commit) carries the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

impl Message {
    pub fn from_event(ev: &ChangeEvent) -> Self {
        let verb = match ev.kind {
            ChangeKind::New => "New",
            ChangeKind::Updated => "Updated",
        };
        let mut body = ev.item.meta.title.clone();
        if let Some(size) = ev.item.meta.size {
            body.push_str(&format!(" ({})", human_size(size)));
        }
        Self {
            id: ev.event_id.clone(),
            source_id: ev.source_id.clone(),
            title: format!("{verb} on {}", ev.source_id),
            body,
            link: ev.item.payload.clone(),
        }
    }

    /// Plain-text rendering shared by text-only channels.
    pub fn render_plain(&self) -> String {
        match &self.link {
            Some(link) => format!("{}\n{}\n{}", self.title, self.body, link),
            None => format!("{}\n{}", self.title, self.body),
        }
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = bytes as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{v:.1} {}", UNITS[unit])
    }
}

/// A channel a message can be delivered to (bot conversation, webhook, mail).
/// One call is one attempt; retry and timeouts belong to the dispatch router.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, msg: &Message) -> Result<()>;
    fn kind(&self) -> &'static str;
}
