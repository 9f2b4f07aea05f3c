// src/notify/transmission.rs
//! Hands discovered torrents to a Transmission daemon over its JSON-RPC
//! interface (`torrent-add` with the payload URL as `filename`).

use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Message, NotificationSink};

const DEFAULT_RPC_URL: &str = "http://localhost:9091/transmission/rpc";
/// CSRF token the daemon hands out with a 409 and expects on every call.
pub const SESSION_HEADER: &str = "X-Transmission-Session-Id";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransmissionOptions {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'static str,
    arguments: AddArgs<'a>,
}

#[derive(Debug, Serialize)]
struct AddArgs<'a> {
    filename: &'a str,
    #[serde(rename = "download-dir", skip_serializing_if = "Option::is_none")]
    download_dir: Option<&'a str>,
    paused: bool,
}

#[derive(Deserialize)]
struct RpcReply {
    result: String,
    #[serde(default)]
    arguments: Value,
}

pub struct TransmissionSink {
    url: String,
    user: Option<String>,
    password: Option<String>,
    download_dir: Option<String>,
    paused: bool,
    session_id: Mutex<String>,
    client: Client,
}

impl TransmissionSink {
    pub fn new(opts: TransmissionOptions) -> Self {
        Self {
            url: opts.url.unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            user: opts.user,
            password: opts.password,
            download_dir: opts.download_dir,
            paused: opts.paused,
            session_id: Mutex::new(String::new()),
            client: Client::new(),
        }
    }

    fn add_request<'a>(&'a self, link: &'a str) -> RpcRequest<'a> {
        RpcRequest {
            method: "torrent-add",
            arguments: AddArgs {
                filename: link,
                download_dir: self.download_dir.as_deref(),
                paused: self.paused,
            },
        }
    }

    async fn post(&self, req: &RpcRequest<'_>) -> Result<reqwest::Response> {
        let sid = self
            .session_id
            .lock()
            .expect("transmission session mutex poisoned")
            .clone();
        let mut builder = self
            .client
            .post(&self.url)
            .header(SESSION_HEADER, sid)
            .json(req);
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_deref());
        }
        builder.send().await.context("transmission RPC request")
    }
}

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl NotificationSink for TransmissionSink {
    async fn send(&self, msg: &Message) -> Result<()> {
        let Some(link) = msg.link.as_deref() else {
            tracing::warn!(target: "notify", id = %msg.id, "no torrent link; nothing to add");
            return Ok(());
        };
        let req = self.add_request(link);

        let mut rsp = self.post(&req).await?;
        if rsp.status() == StatusCode::CONFLICT {
            let sid = session_id_from(rsp.headers())
                .ok_or_else(|| anyhow!("transmission: 409 without {SESSION_HEADER}"))?;
            *self
                .session_id
                .lock()
                .expect("transmission session mutex poisoned") = sid;
            rsp = self.post(&req).await?;
        }
        if rsp.status() == StatusCode::UNAUTHORIZED {
            bail!("transmission: credentials rejected");
        }
        let rsp = rsp
            .error_for_status()
            .map_err(|e| anyhow!("transmission RPC HTTP error: {e}"))?;

        let reply: RpcReply = rsp.json().await.context("transmission reply body")?;
        if reply.result != "success" {
            bail!("transmission rejected torrent-add: {}", reply.result);
        }
        if reply.arguments.get("torrent-duplicate").is_some() {
            tracing::debug!(target: "notify", link, "torrent already present");
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "transmission"
    }
}
