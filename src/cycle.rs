// src/cycle.rs
//! One poll cycle of one source: fetch → dedup → dispatch → commit.
//!
//! Only events whose deliveries all reached a terminal outcome are written to
//! the store; everything else is regenerated by the next poll. The commit runs
//! in its own task so a shutdown that abandons the cycle cannot interrupt a
//! write that already started.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;

use crate::dedup::{detect_changes, ChangeKind};
use crate::dispatch::DispatchRouter;
use crate::error::{CycleError, SourceError, StoreError};
use crate::ingest::TrackedSource;
use crate::status::{SourcePhase, StatusBoard};
use crate::store::{CommitBatch, StateStore};

/// Shared collaborators of every cycle run by one engine.
#[derive(Clone)]
pub struct CycleContext {
    pub store: Arc<dyn StateStore>,
    pub router: Arc<DispatchRouter>,
    /// Drop records not seen for this long.
    pub retention: Option<Duration>,
    pub status: Arc<StatusBoard>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle: u64,
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Events left uncommitted because a delivery is still pending.
    pub deferred: usize,
    pub committed: usize,
}

pub async fn run_cycle(
    ctx: &CycleContext,
    source: &TrackedSource,
    abort: &CancellationToken,
) -> Result<CycleSummary, CycleError> {
    let sid = source.id.as_str();

    ctx.status.set_phase(sid, SourcePhase::Polling);
    let t0 = Instant::now();
    let items = tokio::select! {
        biased;
        _ = abort.cancelled() => return Err(CycleError::Aborted),
        r = tokio::time::timeout(source.fetch_timeout, source.adapter.fetch()) => match r {
            Ok(res) => res?,
            Err(_) => {
                return Err(SourceError::unavailable(format!(
                    "fetch timed out after {}s",
                    source.fetch_timeout.as_secs()
                ))
                .into())
            }
        },
    };
    histogram!("ingest_fetch_ms", "source" => source.id.clone()).record(t0.elapsed().as_secs_f64() * 1000.0);
    counter!("ingest_items_total", "source" => source.id.clone()).increment(items.len() as u64);

    let prior = tokio::select! {
        biased;
        _ = abort.cancelled() => return Err(CycleError::Aborted),
        r = ctx.store.get(sid) => r?,
    };
    let cycle = prior
        .values()
        .map(|r| r.last_seen_cycle)
        .max()
        .map_or(1, |c| c + 1);

    let outcome = detect_changes(sid, &items, &prior);
    if outcome.duplicates > 0 {
        counter!("ingest_duplicate_ids_total", "source" => source.id.clone()).increment(outcome.duplicates as u64);
    }

    let mut summary = CycleSummary {
        cycle,
        fetched: items.len(),
        unchanged: outcome.unchanged.len(),
        ..CycleSummary::default()
    };
    for ev in &outcome.events {
        match ev.kind {
            ChangeKind::New => summary.new += 1,
            ChangeKind::Updated => summary.updated += 1,
        }
    }

    ctx.status.set_phase(sid, SourcePhase::Dispatching);
    let report = tokio::select! {
        biased;
        _ = abort.cancelled() => return Err(CycleError::Aborted),
        r = ctx.router.dispatch(sid, &outcome.events) => r,
    };
    summary.delivered = report.delivered();
    summary.failed = report.failed();

    let now = Utc::now();
    let mut batch = CommitBatch {
        upserts: Vec::with_capacity(outcome.events.len() + outcome.unchanged.len()),
        prune_before: ctx
            .retention
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now - d),
    };
    let mut touched = outcome.unchanged.len();
    for ev in &outcome.events {
        if !report.is_resolved(&ev.event_id) {
            summary.deferred += 1;
            // old metadata kept so the event recurs; touched so retention keeps it
            if let Some(rec) = prior.get(&ev.item.id) {
                batch.upserts.push(rec.touched(cycle, now));
                touched += 1;
            }
            continue;
        }
        let rec = match prior.get(&ev.item.id) {
            Some(rec) => rec.updated(&ev.item, cycle, now),
            None => crate::store::SeenRecord::first_sighting(&ev.item, cycle, now),
        };
        batch.upserts.push(rec);
    }
    for id in &outcome.unchanged {
        if let Some(rec) = prior.get(id) {
            batch.upserts.push(rec.touched(cycle, now));
        }
    }
    summary.committed = batch.upserts.len().saturating_sub(touched);

    if !batch.is_empty() {
        ctx.status.set_phase(sid, SourcePhase::Committing);
        let store = ctx.store.clone();
        let owned_id = source.id.clone();
        let write = tokio::spawn(async move { store.commit(&owned_id, batch).await });
        match write.await {
            Ok(res) => res?,
            Err(e) => return Err(StoreError::unavailable(format!("commit task failed: {e}")).into()),
        }
    }

    tracing::info!(
        target: "scheduler",
        source = sid,
        cycle,
        fetched = summary.fetched,
        new = summary.new,
        updated = summary.updated,
        delivered = summary.delivered,
        failed = summary.failed,
        deferred = summary.deferred,
        "cycle complete"
    );
    Ok(summary)
}
