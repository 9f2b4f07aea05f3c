// src/report.rs
//! Terminal failures surfaced to the operator: permanently failed deliveries
//! and disabled sources. Each incident is reported once.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::notify::{Message, NotificationSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incident {
    DeliveryFailed {
        source_id: String,
        event_id: String,
        sink: String,
        attempts: u32,
        error: String,
    },
    SourceDisabled {
        source_id: String,
        error: String,
    },
}

impl Incident {
    /// Identity used to suppress repeats.
    pub fn key(&self) -> String {
        match self {
            Incident::DeliveryFailed {
                source_id,
                event_id,
                sink,
                ..
            } => format!("delivery:{source_id}:{event_id}:{sink}"),
            Incident::SourceDisabled { source_id, .. } => format!("disabled:{source_id}"),
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            Incident::DeliveryFailed {
                source_id,
                event_id,
                sink,
                attempts,
                error,
            } => Message {
                id: self.key(),
                source_id: source_id.clone(),
                title: format!("Delivery to `{sink}` failed"),
                body: format!("event {event_id} gave up after {attempts} attempts: {error}"),
                link: None,
            },
            Incident::SourceDisabled { source_id, error } => Message {
                id: self.key(),
                source_id: source_id.clone(),
                title: format!("Source `{source_id}` disabled"),
                body: format!("credentials rejected: {error}. Fix the configuration and reload."),
                link: None,
            },
        }
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, incident: &Incident);
}

/// Logs incidents at error level.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, incident: &Incident) {
        match incident {
            Incident::DeliveryFailed {
                source_id,
                event_id,
                sink,
                attempts,
                error,
            } => tracing::error!(
                target: "dispatch",
                source = %source_id,
                event = %event_id,
                sink = %sink,
                attempts,
                error = %error,
                "delivery failed permanently"
            ),
            Incident::SourceDisabled { source_id, error } => tracing::error!(
                target: "scheduler",
                source = %source_id,
                error = %error,
                "source disabled until reconfigured"
            ),
        }
    }
}

/// Also forwards incidents to an operator sink. Sending happens in the
/// background; a failure there is only logged.
pub struct SinkReporter {
    sink_id: String,
    sink: Arc<dyn NotificationSink>,
}

impl SinkReporter {
    pub fn new(sink_id: impl Into<String>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink_id: sink_id.into(),
            sink,
        }
    }
}

impl ErrorReporter for SinkReporter {
    fn report(&self, incident: &Incident) {
        TracingReporter.report(incident);
        let msg = incident.to_message();
        let sink = self.sink.clone();
        let sink_id = self.sink_id.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.send(&msg).await {
                tracing::warn!(target: "dispatch", sink = %sink_id, "incident report failed: {e:#}");
            }
        });
    }
}

/// Suppresses any incident whose key was already reported. Only the most
/// recent `cap` keys are remembered.
pub struct OnceReporter<R> {
    inner: R,
    cap: usize,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

pub const DEFAULT_REMEMBERED_INCIDENTS: usize = 10_000;

impl<R: ErrorReporter> OnceReporter<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_REMEMBERED_INCIDENTS)
    }

    pub fn with_capacity(inner: R, cap: usize) -> Self {
        Self {
            inner,
            cap: cap.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    pub fn remembered(&self) -> usize {
        self.seen.lock().expect("incident set mutex poisoned").keys.len()
    }
}

impl<R: ErrorReporter> ErrorReporter for OnceReporter<R> {
    fn report(&self, incident: &Incident) {
        let key = incident.key();
        let first = {
            let mut seen = self.seen.lock().expect("incident set mutex poisoned");
            if seen.keys.insert(key.clone()) {
                seen.order.push_back(key.clone());
                while seen.order.len() > self.cap {
                    if let Some(old) = seen.order.pop_front() {
                        seen.keys.remove(&old);
                    }
                }
                true
            } else {
                false
            }
        };
        if first {
            self.inner.report(incident);
        } else {
            tracing::trace!(key = %key, "incident already reported");
        }
    }
}

impl<R: ErrorReporter + ?Sized> ErrorReporter for Arc<R> {
    fn report(&self, incident: &Incident) {
        (**self).report(incident)
    }
}
