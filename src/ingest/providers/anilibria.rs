// src/ingest/providers/anilibria.rs
//! Release API source: one item per watched release, updated whenever the
//! latest episode range or the chosen quality changes.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::SourceError;
use crate::ingest::types::{Item, ItemMeta, SourceAdapter};

static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\W_]").unwrap());
static RE_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+-\d+").unwrap());

fn default_quality_prefs() -> Vec<String> {
    vec![
        "HDTVRip 1080p".to_string(),
        "HDTVRip 720p".to_string(),
        "WEBRip 720p".to_string(),
    ]
}

/// Options accepted under `[sources.options]` for `kind = "anilibria"`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnilibriaOptions {
    /// Release codes, e.g. `kabukichou-sherlock`.
    pub releases: Vec<String>,
    #[serde(default = "default_quality_prefs")]
    pub quality_prefs: Vec<String>,
    /// Base for relative torrent links. Defaults to the endpoint's origin.
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    data: Option<ReleaseData>,
}

#[derive(Debug, Deserialize)]
struct ReleaseData {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    torrents: Vec<ApiTorrent>,
}

#[derive(Debug, Deserialize)]
struct ApiTorrent {
    series: String,
    quality: String,
    url: String,
    #[serde(default)]
    size: Option<u64>,
}

/// `"WEBRip-1080p"` → `"webrip1080p"`.
pub fn sanitize_quality(quality: &str) -> String {
    RE_NON_WORD.replace_all(quality, "").to_lowercase()
}

/// `"1-10"` → `[1, 10]`. Non-numeric parts sort first.
fn series_key(range: &str) -> Vec<u64> {
    range
        .split('-')
        .map(|p| p.trim().parse::<u64>().unwrap_or(0))
        .collect()
}

/// Scheme + authority of `url`, without a trailing slash.
fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            let end = rest.find('/').map(|j| i + 3 + j).unwrap_or(url.len());
            url[..end].to_string()
        }
        None => url.trim_end_matches('/').to_string(),
    }
}

/// Turn one API answer into an item, choosing the newest episode range and the
/// preferred quality inside it. `Ok(None)` when the release has no ranged
/// torrents yet (trailers, single files).
pub fn parse_release(
    code: &str,
    host: &str,
    body: &str,
    quality_prefs: &[String],
) -> Result<Option<Item>, SourceError> {
    let resp: ApiResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::parse(format!("release `{code}`: {e}")))?;
    let data = match (resp.status, resp.data) {
        (true, Some(d)) => d,
        _ => return Err(SourceError::parse(format!("release `{code}`: api status false"))),
    };

    // latest range, e.g. prefer 21-41 over 1-20
    let Some(latest) = data
        .torrents
        .iter()
        .filter(|t| RE_RANGE.is_match(&t.series))
        .map(|t| t.series.as_str())
        .max_by_key(|s| series_key(s))
    else {
        return Ok(None);
    };

    // quality -> torrent, first-insertion order, later duplicates overwrite
    let mut available: Vec<(String, &ApiTorrent)> = Vec::new();
    for t in data.torrents.iter().filter(|t| t.series == latest) {
        let q = sanitize_quality(&t.quality);
        match available.iter_mut().find(|(k, _)| *k == q) {
            Some(slot) => slot.1 = t,
            None => available.push((q, t)),
        }
    }

    let mut prefs: Vec<String> = Vec::new();
    for p in quality_prefs {
        let p = sanitize_quality(p);
        if !prefs.contains(&p) {
            prefs.push(p);
        }
    }

    let chosen = prefs
        .iter()
        .find_map(|p| available.iter().find(|(q, _)| q == p))
        .or_else(|| {
            tracing::info!(
                target: "ingest",
                release = code,
                "no preferred quality available, falling back to first"
            );
            available.first()
        });
    let Some((quality, torrent)) = chosen else {
        return Ok(None);
    };

    let name = data
        .names
        .first()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| code.to_string());

    let mut meta = ItemMeta::titled(format!("{name} [{latest}] {}", torrent.quality.trim()));
    meta.size = torrent.size;
    meta.extra.insert("series".into(), latest.to_string());
    meta.extra.insert("quality".into(), quality.clone());

    let link = if torrent.url.starts_with("http") {
        torrent.url.clone()
    } else {
        format!("{}{}", host.trim_end_matches('/'), torrent.url)
    };

    Ok(Some(Item::new(code, meta).with_payload(link)))
}

pub struct AnilibriaSource {
    api_url: String,
    host: String,
    opts: AnilibriaOptions,
    client: reqwest::Client,
}

impl AnilibriaSource {
    pub fn new(api_url: &str, opts: AnilibriaOptions) -> anyhow::Result<Self> {
        anyhow::ensure!(!opts.releases.is_empty(), "anilibria: `releases` is empty");
        let host = opts.host.clone().unwrap_or_else(|| origin_of(api_url));
        Ok(Self {
            api_url: api_url.to_string(),
            host,
            opts,
            client: reqwest::Client::new(),
        })
    }

    async fn fetch_release(&self, code: &str) -> Result<String, SourceError> {
        self.client
            .get(&self.api_url)
            .query(&[("query", "release"), ("code", code)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::from_http(&e))?
            .text()
            .await
            .map_err(SourceError::unavailable)
    }
}

#[async_trait]
impl SourceAdapter for AnilibriaSource {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
        let mut out = Vec::with_capacity(self.opts.releases.len());
        let mut last_parse_err = None;

        for code in &self.opts.releases {
            let body = self.fetch_release(code).await?;
            match parse_release(code, &self.host, &body, &self.opts.quality_prefs) {
                Ok(Some(item)) => out.push(item),
                Ok(None) => {
                    tracing::debug!(target: "ingest", release = %code, "no ranged torrents yet");
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", release = %code, error = %e, "release skipped");
                    last_parse_err = Some(e);
                }
            }
        }

        if out.is_empty() {
            if let Some(e) = last_parse_err {
                return Err(e);
            }
        }
        Ok(out)
    }

    fn kind(&self) -> &'static str {
        "anilibria"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
      "status": true,
      "data": {
        "names": ["Kabukichou Sherlock"],
        "torrents": [
          {"series": "1-12", "quality": "WEBRip 720p", "url": "/upload/torrents/1.torrent"},
          {"series": "13-24", "quality": "WEBRip 720p", "url": "/upload/torrents/2.torrent", "size": 700},
          {"series": "13-24", "quality": "HDTVRip 1080p", "url": "/upload/torrents/3.torrent", "size": 1400},
          {"series": "Trailer", "quality": "HDTVRip 1080p", "url": "/upload/torrents/4.torrent"}
        ]
      }
    }"#;

    fn prefs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sanitize_quality_examples() {
        assert_eq!(sanitize_quality("WEBRip 1080p"), "webrip1080p");
        assert_eq!(sanitize_quality("WEBRip-1080p"), "webrip1080p");
        assert_eq!(sanitize_quality("WEBRip_1080p"), "webrip1080p");
        assert_eq!(sanitize_quality(""), "");
    }

    #[test]
    fn series_ranges_compare_numerically() {
        assert!(series_key("13-24") > series_key("1-12"));
        assert!(series_key("2-3") < series_key("10-11"));
    }

    #[test]
    fn picks_latest_range_and_preferred_quality() {
        let item = parse_release(
            "kabukichou-sherlock",
            "https://www.anilibria.tv",
            BODY,
            &prefs(&["HDTVRip 1080p", "WEBRip 720p"]),
        )
        .unwrap()
        .unwrap();

        assert_eq!(item.id, "kabukichou-sherlock");
        assert_eq!(item.meta.title, "Kabukichou Sherlock [13-24] HDTVRip 1080p");
        assert_eq!(item.meta.size, Some(1400));
        assert_eq!(item.meta.extra["series"], "13-24");
        assert_eq!(item.meta.extra["quality"], "hdtvrip1080p");
        assert_eq!(
            item.payload.as_deref(),
            Some("https://www.anilibria.tv/upload/torrents/3.torrent")
        );
    }

    #[test]
    fn falls_back_to_first_quality() {
        let item = parse_release("x", "https://h", BODY, &prefs(&["BDRip 2160p"]))
            .unwrap()
            .unwrap();
        assert_eq!(item.meta.extra["quality"], "webrip720p");
    }

    #[test]
    fn status_false_is_parse_error() {
        let err = parse_release("x", "https://h", r#"{"status": false}"#, &[]).unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn no_ranged_torrents_yields_nothing() {
        let body = r#"{"status": true, "data": {"torrents": [
            {"series": "Trailer", "quality": "WEBRip 720p", "url": "/t.torrent"}]}}"#;
        assert!(parse_release("x", "https://h", body, &[]).unwrap().is_none());
    }

    #[test]
    fn origin_strips_path() {
        assert_eq!(
            origin_of("https://www.anilibria.tv/public/api/index.php"),
            "https://www.anilibria.tv"
        );
    }
}
