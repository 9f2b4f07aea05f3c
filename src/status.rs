// src/status.rs
//! Per-source view of the scheduler, served by the status API.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ingest::TrackedSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePhase {
    Idle,
    Polling,
    Dispatching,
    Committing,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: String,
    pub kind: &'static str,
    pub interval_secs: u64,
    pub phase: SourcePhase,
    pub cycles: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: Mutex<BTreeMap<String, SourceStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<String, SourceStatus>) -> R) -> R {
        let mut g = self.inner.lock().expect("status mutex poisoned");
        f(&mut g)
    }

    /// Replace the board with the sources of a (re)built engine.
    pub fn reset<'a>(&self, sources: impl IntoIterator<Item = &'a TrackedSource>) {
        self.with(|m| {
            m.clear();
            for s in sources {
                m.insert(
                    s.id.clone(),
                    SourceStatus {
                        id: s.id.clone(),
                        kind: s.adapter.kind(),
                        interval_secs: s.interval.as_secs(),
                        phase: if s.enabled { SourcePhase::Idle } else { SourcePhase::Disabled },
                        cycles: 0,
                        last_error: None,
                        last_success: None,
                    },
                );
            }
        });
    }

    pub fn set_phase(&self, id: &str, phase: SourcePhase) {
        self.with(|m| {
            if let Some(s) = m.get_mut(id) {
                s.phase = phase;
            }
        });
    }

    pub fn cycle_ok(&self, id: &str) {
        self.with(|m| {
            if let Some(s) = m.get_mut(id) {
                s.cycles += 1;
                s.last_error = None;
                s.last_success = Some(Utc::now());
            }
        });
    }

    pub fn cycle_failed(&self, id: &str, error: &str) {
        self.with(|m| {
            if let Some(s) = m.get_mut(id) {
                s.cycles += 1;
                s.last_error = Some(error.to_string());
            }
        });
    }

    pub fn get(&self, id: &str) -> Option<SourceStatus> {
        self.with(|m| m.get(id).cloned())
    }

    pub fn snapshot(&self) -> Vec<SourceStatus> {
        self.with(|m| m.values().cloned().collect())
    }
}
