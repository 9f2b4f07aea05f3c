// src/dispatch/mod.rs
//! # Dispatch Router
//! Fans change events out to the sinks subscribed to their source.
//!
//! - every (event, sink) pair is retried independently under [`RetryPolicy`]
//! - a sink receives events in fetch order; sinks are served concurrently
//! - an event is *resolved* once every subscribed sink reached a terminal
//!   outcome (delivered or failed permanently); only resolved events may be
//!   committed to the state store
//! - with an inline budget, attempts that would wait past it stay `Pending`
//!   and are resumed by the next dispatch of the same source

pub mod backoff;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::dedup::ChangeEvent;
use crate::error::DeliveryError;
use crate::history::{History, HistoryEntry};
use crate::notify::{Message, NotificationSink};
use crate::report::{ErrorReporter, Incident};

pub use backoff::{RetryPolicy, RetrySettings};

/// Routes events of `source` (exact id, or `*` for every source) to `sinks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub source: String,
    pub sinks: Vec<String>,
}

impl Subscription {
    pub fn matches(&self, source_id: &str) -> bool {
        self.source == "*" || self.source == source_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Pending,
    Delivered,
    FailedPermanent(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryOutcome::Pending)
    }

    fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Pending => "pending",
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::FailedPermanent(_) => "failed",
        }
    }
}

/// State of one event on one sink after a dispatch.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub event_id: String,
    pub item_id: String,
    pub sink: String,
    pub attempts: u32,
    pub next_retry_at: Option<Instant>,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub attempts: Vec<DeliveryAttempt>,
    /// Event ids safe to commit.
    pub resolved: HashSet<String>,
}

impl DispatchReport {
    pub fn is_resolved(&self, event_id: &str) -> bool {
        self.resolved.contains(event_id)
    }

    fn count(&self, label: &str) -> usize {
        self.attempts.iter().filter(|a| a.outcome.label() == label).count()
    }

    pub fn delivered(&self) -> usize {
        self.count("delivered")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn pending(&self) -> usize {
        self.count("pending")
    }
}

type PairKey = (String, String);

/// Per-source leftovers of a dispatch that ended with pending attempts.
#[derive(Debug, Default)]
struct Carried {
    delivered: HashSet<PairKey>,
    failed: HashMap<PairKey, DeliveryError>,
    pending: HashMap<PairKey, (u32, Option<Instant>)>,
}

impl Carried {
    fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty() && self.pending.is_empty()
    }
}

pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("dispatch_attempts_total", "Sink send attempts, by sink and result.");
        describe_counter!("dispatch_outcomes_total", "Delivery outcomes per (event, sink), by outcome.");
        describe_histogram!("dispatch_ms", "Wall time of one dispatch call in milliseconds.");
    });
}

pub struct DispatchRouter {
    sinks: BTreeMap<String, Arc<dyn NotificationSink>>,
    subscriptions: Vec<Subscription>,
    policy: RetryPolicy,
    reporter: Arc<dyn ErrorReporter>,
    history: Arc<History>,
    carried: Mutex<HashMap<String, Carried>>,
}

impl DispatchRouter {
    pub fn new(
        sinks: BTreeMap<String, Arc<dyn NotificationSink>>,
        subscriptions: Vec<Subscription>,
        policy: RetryPolicy,
        reporter: Arc<dyn ErrorReporter>,
        history: Arc<History>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            sinks,
            subscriptions,
            policy,
            reporter,
            history,
            carried: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sinks interested in `source_id`: de-duplicated, in configuration order.
    pub fn sinks_for(&self, source_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.subscriptions
            .iter()
            .filter(|s| s.matches(source_id))
            .flat_map(|s| s.sinks.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Pending attempts held for the next dispatch of `source_id`.
    pub fn carried_pending(&self, source_id: &str) -> usize {
        self.lock_carried()
            .get(source_id)
            .map_or(0, |c| c.pending.len())
    }

    fn lock_carried(&self) -> std::sync::MutexGuard<'_, HashMap<String, Carried>> {
        self.carried.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn dispatch(&self, source_id: &str, events: &[ChangeEvent]) -> DispatchReport {
        let started = Instant::now();
        let sink_ids = self.sinks_for(source_id);
        // Leftovers for events that are no longer current are dropped with it.
        let carried = self.lock_carried().remove(source_id).unwrap_or_default();

        if sink_ids.is_empty() {
            if !events.is_empty() {
                tracing::debug!(target: "dispatch", source = source_id, events = events.len(), "no subscribed sinks");
            }
            return DispatchReport {
                attempts: Vec::new(),
                resolved: events.iter().map(|e| e.event_id.clone()).collect(),
            };
        }

        let per_sink = futures::future::join_all(
            sink_ids
                .iter()
                .map(|sink_id| self.deliver_to_sink(source_id, sink_id, events, &carried, started)),
        )
        .await;
        let attempts: Vec<DeliveryAttempt> = per_sink.into_iter().flatten().collect();

        let unresolved: HashSet<&str> = attempts
            .iter()
            .filter(|a| !a.outcome.is_terminal())
            .map(|a| a.event_id.as_str())
            .collect();
        let resolved: HashSet<String> = events
            .iter()
            .map(|e| e.event_id.as_str())
            .filter(|id| !unresolved.contains(id))
            .map(str::to_string)
            .collect();

        let mut next = Carried::default();
        for a in attempts.iter().filter(|a| unresolved.contains(a.event_id.as_str())) {
            let key = (a.event_id.clone(), a.sink.clone());
            match &a.outcome {
                DeliveryOutcome::Pending => {
                    next.pending.insert(key, (a.attempts, a.next_retry_at));
                }
                DeliveryOutcome::Delivered => {
                    next.delivered.insert(key);
                }
                DeliveryOutcome::FailedPermanent(e) => {
                    next.failed.insert(key, e.clone());
                }
            }
        }
        if !next.is_empty() {
            tracing::info!(
                target: "dispatch",
                source = source_id,
                pending = next.pending.len(),
                "deliveries carried over to next cycle"
            );
            self.lock_carried().insert(source_id.to_string(), next);
        }

        let report = DispatchReport { attempts, resolved };
        histogram!("dispatch_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(
            target: "dispatch",
            source = source_id,
            events = events.len(),
            delivered = report.delivered(),
            failed = report.failed(),
            pending = report.pending(),
            "dispatch finished"
        );
        report
    }

    /// Deliver `events` to one sink in order. Once an attempt has to be
    /// carried over, every later event for this sink waits too.
    async fn deliver_to_sink(
        &self,
        source_id: &str,
        sink_id: &str,
        events: &[ChangeEvent],
        carried: &Carried,
        started: Instant,
    ) -> Vec<DeliveryAttempt> {
        let sink = self.sinks.get(sink_id).cloned();
        let mut held_back = false;
        let mut out = Vec::with_capacity(events.len());

        for ev in events {
            let key = (ev.event_id.clone(), sink_id.to_string());
            let mut att = DeliveryAttempt {
                event_id: ev.event_id.clone(),
                item_id: ev.item.id.clone(),
                sink: sink_id.to_string(),
                attempts: 0,
                next_retry_at: None,
                outcome: DeliveryOutcome::Pending,
            };

            if carried.delivered.contains(&key) {
                att.outcome = DeliveryOutcome::Delivered;
                out.push(att);
                continue;
            }
            if let Some(e) = carried.failed.get(&key) {
                att.attempts = e.attempts;
                att.outcome = DeliveryOutcome::FailedPermanent(e.clone());
                out.push(att);
                continue;
            }
            if let Some(&(n, at)) = carried.pending.get(&key) {
                att.attempts = n;
                att.next_retry_at = at;
            }
            if held_back {
                out.push(att);
                continue;
            }

            let Some(sink) = sink.as_ref() else {
                // Validation keeps this unreachable for configured engines.
                att.outcome = self.give_up(source_id, &att, "sink not configured".into());
                out.push(att);
                continue;
            };

            let before = att.attempts;
            self.deliver_one(source_id, sink.as_ref(), ev, &mut att, started).await;
            if att.outcome == DeliveryOutcome::Pending {
                held_back = true;
            }
            if att.attempts > before {
                self.record(source_id, ev, &att);
            }
            out.push(att);
        }
        out
    }

    async fn deliver_one(
        &self,
        source_id: &str,
        sink: &dyn NotificationSink,
        ev: &ChangeEvent,
        att: &mut DeliveryAttempt,
        started: Instant,
    ) {
        let msg = Message::from_event(ev);
        loop {
            if let Some(at) = att.next_retry_at {
                let wait = at.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    if !self.fits_budget(started, wait) {
                        tracing::debug!(
                            target: "dispatch",
                            source = source_id,
                            sink = %att.sink,
                            event = %att.event_id,
                            wait_ms = wait.as_millis() as u64,
                            "retry exceeds inline budget; carrying over"
                        );
                        return;
                    }
                    tokio::time::sleep(wait).await;
                }
            }

            att.attempts += 1;
            let result = match tokio::time::timeout(self.policy.attempt_timeout, sink.send(&msg)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(_) => Err(format!("timed out after {:?}", self.policy.attempt_timeout)),
            };

            match result {
                Ok(()) => {
                    counter!("dispatch_attempts_total", "sink" => att.sink.clone(), "result" => "ok").increment(1);
                    att.next_retry_at = None;
                    att.outcome = DeliveryOutcome::Delivered;
                    tracing::debug!(
                        target: "dispatch",
                        source = source_id,
                        sink = %att.sink,
                        event = %att.event_id,
                        attempts = att.attempts,
                        "delivered"
                    );
                    return;
                }
                Err(error) => {
                    counter!("dispatch_attempts_total", "sink" => att.sink.clone(), "result" => "error").increment(1);
                    if att.attempts >= self.policy.max_attempts {
                        att.next_retry_at = None;
                        att.outcome = self.give_up(source_id, att, error);
                        return;
                    }
                    let delay = self.policy.delay_after(att.attempts);
                    tracing::warn!(
                        target: "dispatch",
                        source = source_id,
                        sink = %att.sink,
                        event = %att.event_id,
                        attempt = att.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "send failed: {error}"
                    );
                    att.next_retry_at = Some(Instant::now() + delay);
                }
            }
        }
    }

    fn fits_budget(&self, started: Instant, wait: Duration) -> bool {
        match self.policy.inline_budget {
            None => true,
            Some(budget) => started.elapsed() + wait <= budget,
        }
    }

    fn give_up(&self, source_id: &str, att: &DeliveryAttempt, last_error: String) -> DeliveryOutcome {
        let err = DeliveryError {
            sink: att.sink.clone(),
            attempts: att.attempts,
            last_error,
        };
        self.reporter.report(&Incident::DeliveryFailed {
            source_id: source_id.to_string(),
            event_id: att.event_id.clone(),
            sink: err.sink.clone(),
            attempts: err.attempts,
            error: err.last_error.clone(),
        });
        DeliveryOutcome::FailedPermanent(err)
    }

    fn record(&self, source_id: &str, ev: &ChangeEvent, att: &DeliveryAttempt) {
        let outcome = att.outcome.label();
        counter!("dispatch_outcomes_total", "outcome" => outcome).increment(1);
        self.history.push(HistoryEntry {
            ts_unix: 0,
            source_id: source_id.to_string(),
            sink: att.sink.clone(),
            event_id: att.event_id.clone(),
            title: ev.item.meta.title.clone(),
            outcome,
            attempts: att.attempts,
        });
    }
}
