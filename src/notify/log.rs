// src/notify/log.rs
use anyhow::Result;

use super::{Message, NotificationSink};

/// Writes messages to the log instead of an external channel (dry runs).
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, msg: &Message) -> Result<()> {
        tracing::info!(
            target: "notify",
            id = %msg.id,
            source = %msg.source_id,
            link = msg.link.as_deref().unwrap_or("-"),
            "{}: {}",
            msg.title,
            msg.body
        );
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}
