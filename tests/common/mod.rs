// tests/common/mod.rs
//
// Shared test doubles: scripted sources, sinks, stores and reporters.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use tracker_notify::cycle::CycleContext;
use tracker_notify::dispatch::{DispatchRouter, RetryPolicy, Subscription};
use tracker_notify::history::History;
use tracker_notify::ingest::TrackedSource;
use tracker_notify::report::{ErrorReporter, Incident};
use tracker_notify::status::StatusBoard;
use tracker_notify::store::{CommitBatch, MemoryStore, SeenRecord, StateStore};
use tracker_notify::{Item, ItemMeta, Message, NotificationSink, SourceAdapter, SourceError, StoreError};

pub fn item(id: &str, title: &str) -> Item {
    Item::new(id, ItemMeta::titled(title))
}

/// Returns whatever it was last told to.
pub struct StaticSource {
    next: Mutex<Result<Vec<Item>, SourceError>>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(items: Vec<Item>) -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(Ok(items)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: SourceError) -> Arc<Self> {
        let s = Self::new(Vec::new());
        s.fail(err);
        s
    }

    pub fn set(&self, items: Vec<Item>) {
        *self.next.lock() = Ok(items);
    }

    pub fn fail(&self, err: SourceError) {
        *self.next.lock() = Err(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SourceAdapter for StaticSource {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().clone()
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}

/// Takes `delay` per fetch and tracks how many fetches overlap.
pub struct SlowSource {
    pub delay: Duration,
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl SourceAdapter for SlowSource {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![item("slow", "slow item")])
    }

    fn kind(&self) -> &'static str {
        "slow"
    }
}

/// Records when each fetch started, then takes `delay` to answer.
pub struct TimedSource {
    pub delay: Duration,
    pub started: Mutex<Vec<Instant>>,
}

impl TimedSource {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            started: Mutex::new(Vec::new()),
        })
    }

    /// Fetch start times in whole seconds after `origin`.
    pub fn fire_secs(&self, origin: Instant) -> Vec<u64> {
        self.started
            .lock()
            .iter()
            .map(|t| t.duration_since(origin).as_secs())
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceAdapter for TimedSource {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
        self.started.lock().push(Instant::now());
        tokio::time::sleep(self.delay).await;
        Ok(vec![item("timed", "timed item")])
    }

    fn kind(&self) -> &'static str {
        "timed"
    }
}

/// Fails the first `fail_first` sends, then succeeds. Records every call.
#[derive(Default)]
pub struct ScriptedSink {
    fail_left: Mutex<u32>,
    pub attempts: Mutex<Vec<(Instant, String)>>,
    pub delivered: Mutex<Vec<Message>>,
}

impl ScriptedSink {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(n: u32) -> Arc<Self> {
        let s = Self::default();
        *s.fail_left.lock() = n;
        Arc::new(s)
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing_first(u32::MAX)
    }

    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|m| m.id.clone()).collect()
    }

    pub fn delivered_bodies(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|m| m.body.clone()).collect()
    }

    /// Gaps between consecutive attempts, in whole seconds.
    pub fn gaps_secs(&self) -> Vec<u64> {
        let a = self.attempts.lock();
        a.windows(2)
            .map(|w| w[1].0.duration_since(w[0].0).as_secs())
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationSink for ScriptedSink {
    async fn send(&self, msg: &Message) -> anyhow::Result<()> {
        self.attempts.lock().push((Instant::now(), msg.id.clone()));
        {
            let mut left = self.fail_left.lock();
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("scripted failure");
            }
        }
        self.delivered.lock().push(msg.clone());
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }
}

/// Memory store whose commits can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_commits: AtomicBool,
    pub commits: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, source_id: &str, records: impl IntoIterator<Item = SeenRecord>) {
        self.inner.seed(source_id, records);
    }
}

#[async_trait::async_trait]
impl StateStore for FlakyStore {
    async fn get(&self, source_id: &str) -> Result<HashMap<String, SeenRecord>, StoreError> {
        self.inner.get(source_id).await
    }

    async fn commit(&self, source_id: &str, batch: CommitBatch) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("disk on fire"));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(source_id, batch).await
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub incidents: Mutex<Vec<Incident>>,
}

impl RecordingReporter {
    pub fn count(&self) -> usize {
        self.incidents.lock().len()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, incident: &Incident) {
        self.incidents.lock().push(incident.clone());
    }
}

pub fn policy(base_secs: u64, cap_secs: u64, attempts: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_secs(base_secs),
        max_delay: Duration::from_secs(cap_secs),
        max_attempts: attempts,
        attempt_timeout: Duration::from_secs(10),
        inline_budget: None,
    }
}

/// Router with every sink subscribed to every source.
pub fn router(
    sinks: &[(&str, Arc<ScriptedSink>)],
    policy: RetryPolicy,
    reporter: Arc<dyn ErrorReporter>,
) -> Arc<DispatchRouter> {
    let map: BTreeMap<String, Arc<dyn NotificationSink>> = sinks
        .iter()
        .map(|(id, s)| (id.to_string(), s.clone() as Arc<dyn NotificationSink>))
        .collect();
    let subs = vec![Subscription {
        source: "*".into(),
        sinks: sinks.iter().map(|(id, _)| id.to_string()).collect(),
    }];
    Arc::new(DispatchRouter::new(
        map,
        subs,
        policy,
        reporter,
        Arc::new(History::with_capacity(100)),
    ))
}

pub fn tracked(id: &str, adapter: Arc<dyn SourceAdapter>, interval: Duration) -> TrackedSource {
    TrackedSource {
        id: id.into(),
        endpoint: format!("test://{id}"),
        interval,
        fetch_timeout: Duration::from_secs(30),
        enabled: true,
        adapter,
    }
}

pub fn context(store: Arc<dyn StateStore>, router: Arc<DispatchRouter>) -> CycleContext {
    CycleContext {
        store,
        router,
        retention: None,
        status: Arc::new(StatusBoard::new()),
    }
}
