use super::{Message, NotificationSink};
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordOptions {
    pub webhook: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct DiscordSink {
    webhook: String,
    username: Option<String>,
    client: Client,
}

impl DiscordSink {
    pub fn new(opts: DiscordOptions) -> Self {
        Self {
            webhook: opts.webhook,
            username: opts.username,
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for DiscordSink {
    async fn send(&self, msg: &Message) -> Result<()> {
        let description = match &msg.link {
            Some(link) => format!("{}\n{}", msg.body, link),
            None => msg.body.clone(),
        };
        let payload = DiscordWebhookPayload::embed(
            self.username.clone(),
            &msg.title,
            &description,
            msg.link.clone(),
        );

        let rsp = self
            .client
            .post(&self.webhook)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("Discord webhook request failed: {e}"))?;
        rsp.error_for_status_ref()
            .map_err(|e| anyhow!("Discord webhook HTTP error: {e}"))?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(username: Option<String>, title: &str, description: &str, url: Option<String>) -> Self {
        Self {
            username,
            content: None,
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: description.to_string(),
                url,
            }],
        }
    }
}
