use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;

use super::{Message, NotificationSink};

#[derive(Debug, Clone, Deserialize)]
pub struct SlackOptions {
    pub webhook_url: String,
}

pub struct SlackSink {
    webhook_url: String,
    client: Client,
}

impl SlackSink {
    pub fn new(opts: SlackOptions) -> Self {
        Self {
            webhook_url: opts.webhook_url,
            client: Client::new(),
        }
    }
}

fn slack_text(msg: &Message) -> String {
    match &msg.link {
        Some(link) => format!("*{}*\n{}\n<{}>", msg.title, msg.body, link),
        None => format!("*{}*\n{}", msg.title, msg.body),
    }
}

#[async_trait::async_trait]
impl NotificationSink for SlackSink {
    async fn send(&self, msg: &Message) -> Result<()> {
        let body = serde_json::json!({ "text": slack_text(msg) });

        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "slack"
    }
}
