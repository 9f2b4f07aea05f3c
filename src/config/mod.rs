// src/config/mod.rs
//! Engine configuration: sources, sinks, subscriptions and the knobs around
//! them. Loaded from TOML or JSON, secrets resolved from the environment,
//! validated against the adapter/sink registries before anything starts.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{RetryPolicy, RetrySettings, Subscription};
use crate::error::ConfigError;
use crate::ingest::registry::SourceRegistry;
use crate::notify::registry::SinkRegistry;
use crate::registry::did_you_mean;
use crate::store::StoreConfig;

pub const ENV_CONFIG_PATH: &str = "TRACKER_NOTIFY_CONFIG";

/// Prefix marking a value to be read from the environment, e.g. `env:TG_TOKEN`.
const ENV_SECRET_PREFIX: &str = "env:";

fn default_concurrency() -> usize {
    4
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Simultaneous in-flight cycles across all sources.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_interval_secs: default_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportingSettings {
    /// Sink id that also receives terminal failures.
    #[serde(default)]
    pub sink: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    /// Kind-specific settings, handed to the adapter factory.
    #[serde(default)]
    pub options: Value,
}

impl SourceConfig {
    pub fn interval(&self, defaults: &SchedulerSettings) -> Duration {
        Duration::from_secs(self.interval_secs.unwrap_or(defaults.default_interval_secs))
    }

    pub fn fetch_timeout(&self, defaults: &SchedulerSettings) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.unwrap_or(defaults.fetch_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub status: Option<StatusSettings>,
    #[serde(default)]
    pub reporting: ReportingSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl AppConfig {
    /// Parse a document; `hint_ext` ("toml" / "json") decides what is tried first.
    pub fn parse(s: &str, hint_ext: &str) -> Result<Self, ConfigError> {
        let as_toml = |s: &str| toml::from_str::<AppConfig>(s).map_err(|e| e.to_string());
        let as_json = |s: &str| serde_json::from_str::<AppConfig>(s).map_err(|e| e.to_string());
        let (first, second) = if hint_ext == "json" {
            (as_json(s), None)
        } else {
            (as_toml(s), (hint_ext != "toml").then(|| as_json(s)))
        };
        match (first, second) {
            (Ok(cfg), _) | (Err(_), Some(Ok(cfg))) => Ok(cfg),
            (Err(e), _) => Err(ConfigError::Parse(e)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().into()
    }

    /// Replace every `env:VAR` string in endpoints and options.
    pub fn resolve_secrets(&mut self) -> Result<(), ConfigError> {
        for s in &mut self.sources {
            resolve_str(&mut s.endpoint)?;
            resolve_value(&mut s.options)?;
        }
        for k in &mut self.sinks {
            resolve_value(&mut k.options)?;
        }
        Ok(())
    }

    /// Fail fast on anything that would only blow up later.
    pub fn validate(&self, sources: &SourceRegistry, sinks: &SinkRegistry) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.concurrency == 0 {
            return Err(ConfigError::invalid("scheduler.concurrency must be at least 1"));
        }
        if s.default_interval_secs == 0 {
            return Err(ConfigError::invalid("scheduler.default_interval_secs must be positive"));
        }
        if s.fetch_timeout_secs == 0 {
            return Err(ConfigError::invalid("scheduler.fetch_timeout_secs must be positive"));
        }

        let r = &self.retry;
        if r.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts must be at least 1"));
        }
        if r.base_delay_ms > r.max_delay_ms {
            return Err(ConfigError::invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                r.base_delay_ms, r.max_delay_ms
            )));
        }
        if r.attempt_timeout_secs == 0 {
            return Err(ConfigError::invalid("retry.attempt_timeout_secs must be positive"));
        }

        let mut source_ids = HashSet::new();
        for src in &self.sources {
            if src.id.trim().is_empty() {
                return Err(ConfigError::invalid("source with empty id"));
            }
            if !source_ids.insert(src.id.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate source id `{}`", src.id)));
            }
            if !sources.contains(&src.kind) {
                return Err(sources.unknown_kind(&src.id, &src.kind));
            }
            if src.interval_secs == Some(0) {
                return Err(ConfigError::invalid(format!("source `{}`: interval must be positive", src.id)));
            }
            if src.fetch_timeout_secs == Some(0) {
                return Err(ConfigError::invalid(format!(
                    "source `{}`: fetch timeout must be positive",
                    src.id
                )));
            }
        }

        let mut sink_ids = HashSet::new();
        for sink in &self.sinks {
            if sink.id.trim().is_empty() {
                return Err(ConfigError::invalid("sink with empty id"));
            }
            if !sink_ids.insert(sink.id.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate sink id `{}`", sink.id)));
            }
            if !sinks.contains(&sink.kind) {
                return Err(sinks.unknown_kind(&sink.id, &sink.kind));
            }
        }

        for sub in &self.subscriptions {
            if sub.source != "*" && !source_ids.contains(sub.source.as_str()) {
                return Err(unknown_ref("subscription source", &sub.source, &source_ids));
            }
            for sink in &sub.sinks {
                if !sink_ids.contains(sink.as_str()) {
                    return Err(unknown_ref("subscription sink", sink, &sink_ids));
                }
            }
        }

        if let Some(sink) = &self.reporting.sink {
            if !sink_ids.contains(sink.as_str()) {
                return Err(unknown_ref("reporting sink", sink, &sink_ids));
            }
        }
        Ok(())
    }
}

fn unknown_ref(what: &str, name: &str, known: &HashSet<&str>) -> ConfigError {
    let hint = did_you_mean(name, known.iter().copied())
        .map(|s| format!("; did you mean `{s}`?"))
        .unwrap_or_default();
    ConfigError::invalid(format!("{what} `{name}` is not defined{hint}"))
}

fn resolve_str(s: &mut String) -> Result<(), ConfigError> {
    if let Some(var) = s.trim().strip_prefix(ENV_SECRET_PREFIX) {
        let var = var.trim().to_string();
        *s = std::env::var(&var).map_err(|_| ConfigError::MissingEnv(var))?;
    }
    Ok(())
}

fn resolve_value(v: &mut Value) -> Result<(), ConfigError> {
    match v {
        Value::String(s) => resolve_str(s),
        Value::Array(items) => items.iter_mut().try_for_each(resolve_value),
        Value::Object(map) => map.values_mut().try_for_each(resolve_value),
        _ => Ok(()),
    }
}

/// Deserialize kind-specific options; a missing table means "all defaults".
pub fn options_as<T: DeserializeOwned>(options: &Value) -> anyhow::Result<T> {
    let v = match options {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(v).context("invalid options")
}

/// Load, parse and resolve secrets from an explicit path.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = AppConfig::parse(&content, &ext)?;
    cfg.resolve_secrets()?;
    tracing::info!(
        path = %path.display(),
        sources = cfg.sources.len(),
        sinks = cfg.sinks.len(),
        "configuration loaded"
    );
    Ok(cfg)
}

/// Locate the configuration:
/// 1) $TRACKER_NOTIFY_CONFIG
/// 2) config/tracker-notify.toml
/// 3) config/tracker-notify.json
pub fn load_default() -> Result<AppConfig, ConfigError> {
    load_from(&locate()?)
}

pub fn locate() -> Result<PathBuf, ConfigError> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        // Reading reports a missing file with its path.
        return Ok(PathBuf::from(p));
    }
    for candidate in ["config/tracker-notify.toml", "config/tracker-notify.json"] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return Ok(pb);
        }
    }
    Err(ConfigError::invalid(format!(
        "no configuration found; set {ENV_CONFIG_PATH} or create config/tracker-notify.toml"
    )))
}
