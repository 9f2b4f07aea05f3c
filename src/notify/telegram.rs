// src/notify/telegram.rs
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Message, NotificationSink};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Numeric chat id or `@channelusername`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Name(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramOptions {
    pub token: String,
    pub chat_id: ChatId,
    #[serde(default)]
    pub disable_preview: bool,
    /// Override for self-hosted Bot API servers and tests.
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a ChatId,
    text: String,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot conversation sink (Bot API `sendMessage`).
#[derive(Clone)]
pub struct TelegramSink {
    endpoint: String,
    chat_id: ChatId,
    disable_preview: bool,
    client: Client,
}

impl TelegramSink {
    pub fn new(opts: TelegramOptions) -> Result<Self> {
        anyhow::ensure!(!opts.token.trim().is_empty(), "telegram: empty token");
        let base = opts.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
        Ok(Self {
            endpoint: format!("{}/bot{}/sendMessage", base.trim_end_matches('/'), opts.token.trim()),
            chat_id: opts.chat_id,
            disable_preview: opts.disable_preview,
            client: Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, msg: &Message) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: msg.render_plain(),
            disable_web_page_preview: self.disable_preview,
        };

        let rsp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("telegram post")?;
        let status = rsp.status();
        // The Bot API explains failures in the body, even on 4xx.
        let reply: ApiReply = rsp.json().await.context("telegram reply body")?;
        if !status.is_success() || !reply.ok {
            return Err(anyhow!(
                "telegram rejected message ({status}): {}",
                reply.description.unwrap_or_default()
            ));
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_accepts_number_or_name() {
        let o: TelegramOptions =
            serde_json::from_str(r#"{"token":"t","chat_id":-100123}"#).unwrap();
        assert_eq!(o.chat_id, ChatId::Id(-100123));
        let o: TelegramOptions =
            serde_json::from_str(r#"{"token":"t","chat_id":"@releases"}"#).unwrap();
        assert_eq!(o.chat_id, ChatId::Name("@releases".into()));
    }

    #[test]
    fn endpoint_uses_token_and_base() {
        let s = TelegramSink::new(TelegramOptions {
            token: "123:abc".into(),
            chat_id: ChatId::Id(1),
            disable_preview: false,
            api_base: Some("http://localhost:8081/".into()),
        })
        .unwrap();
        assert_eq!(s.endpoint, "http://localhost:8081/bot123:abc/sendMessage");
    }

    #[test]
    fn empty_token_is_rejected() {
        let r = TelegramSink::new(TelegramOptions {
            token: " ".into(),
            chat_id: ChatId::Id(1),
            disable_preview: false,
            api_base: None,
        });
        assert!(r.is_err());
    }
}
