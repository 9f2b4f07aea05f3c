// src/ingest/providers/rss.rs
use async_trait::async_trait;
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::SourceError;
use crate::ingest::types::{Item, ItemMeta, SourceAdapter};
use crate::ingest::{content_hash, normalize_text};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@length")]
    length: Option<String>,
}

/// Options accepted under `[sources.options]` for `kind = "rss"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RssOptions {
    /// Raw `Cookie` header for trackers that gate feeds behind a session.
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn parse_rfc2822_to_unix(ts: &str) -> Option<u64> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
}

/// RSS 2.0 tracker feed.
pub struct RssSource {
    mode: Mode,
}

enum Mode {
    // Own copy so tests don't need a 'static fixture.
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        cookie: Option<String>,
    },
}

impl RssSource {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(url: &str, opts: RssOptions) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(ua) = opts.user_agent {
            builder = builder.user_agent(ua);
        }
        let client = builder.build()?;
        Ok(Self {
            mode: Mode::Http {
                url: url.to_string(),
                client,
                cookie: opts.cookie,
            },
        })
    }

    /// Parse a feed document into items, in document order.
    pub fn parse_items_from_str(s: &str) -> Result<Vec<Item>, SourceError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss =
            from_str(&xml_clean).map_err(|e| SourceError::parse(format!("rss xml: {e}")))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let guid = it
                .guid
                .map(|g| g.value.trim().to_string())
                .filter(|g| !g.is_empty());
            let link = it
                .link
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());

            let id = match (guid, &link) {
                (Some(g), _) => g,
                (None, Some(l)) => l.clone(),
                (None, None) if !title.is_empty() => format!("sha:{}", content_hash(&title, 12)),
                (None, None) => continue,
            };

            let (enclosure_url, size) = match it.enclosure {
                Some(e) => (
                    e.url.filter(|u| !u.trim().is_empty()),
                    e.length.and_then(|l| l.trim().parse::<u64>().ok()),
                ),
                None => (None, None),
            };

            let meta = ItemMeta {
                title,
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822_to_unix),
                size,
                ..ItemMeta::default()
            };
            let mut item = Item::new(id, meta);
            item.payload = enclosure_url.or(link);
            out.push(item);
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for RssSource {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s),
            Mode::Http {
                url,
                client,
                cookie,
            } => {
                let mut req = client.get(url);
                if let Some(c) = cookie {
                    req = req.header(reqwest::header::COOKIE, c);
                }
                let body = req
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| SourceError::from_http(&e))?
                    .text()
                    .await
                    .map_err(SourceError::unavailable)?;
                Self::parse_items_from_str(&body)
            }
        }
    }

    fn kind(&self) -> &'static str {
        "rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&laquo;", "\"")
        .replace("&raquo;", "\"")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
