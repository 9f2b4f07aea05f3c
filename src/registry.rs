// src/registry.rs
//! Named factories for pluggable capabilities (source adapters, sinks).
//! Kinds are resolved once, when the engine is built from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ConfigError;

type Factory<C, T> = Arc<dyn Fn(&C) -> anyhow::Result<Arc<T>> + Send + Sync>;

pub struct Registry<C, T: ?Sized> {
    what: &'static str,
    factories: BTreeMap<String, Factory<C, T>>,
}

impl<C, T: ?Sized> Clone for Registry<C, T> {
    fn clone(&self) -> Self {
        Self {
            what: self.what,
            factories: self.factories.clone(),
        }
    }
}

impl<C, T: ?Sized> Registry<C, T> {
    pub fn empty(what: &'static str) -> Self {
        Self {
            what,
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(&C) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        tracing::debug!(what = self.what, kind, "registering kind");
        self.factories
            .insert(kind.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_ascii_lowercase())
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Error for an unknown kind, with a suggestion when one is close.
    pub fn unknown_kind(&self, owner: &str, kind: &str) -> ConfigError {
        let hint = match did_you_mean(kind, self.factories.keys().map(String::as_str)) {
            Some(s) => format!("; did you mean `{s}`?"),
            None => format!("; known kinds: {}", self.kinds().join(", ")),
        };
        ConfigError::invalid(format!(
            "{} `{owner}`: unknown kind `{kind}`{hint}",
            self.what
        ))
    }

    pub fn build(&self, owner: &str, kind: &str, cfg: &C) -> Result<Arc<T>, ConfigError> {
        let factory = self
            .factories
            .get(&kind.to_ascii_lowercase())
            .ok_or_else(|| self.unknown_kind(owner, kind))?;
        factory(cfg).map_err(|e| ConfigError::invalid(format!("{} `{owner}`: {e:#}", self.what)))
    }
}

/// Closest candidate by Jaro-Winkler similarity, if reasonably close.
pub fn did_you_mean<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let name = name.to_ascii_lowercase();
    candidates
        .map(|c| (c, strsim::jaro_winkler(&name, c)))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}
