// src/scheduler.rs
//! # Poll Scheduler
//! One task per enabled source, each on its own interval timer. A shared
//! semaphore bounds how many cycles run at once; a permit is held for the
//! whole cycle.
//!
//! Shutdown happens in two steps:
//! 1. `shutdown` token: no new cycles, in-flight ones may finish
//! 2. after the grace period, the `abort` token: in-flight fetch/dispatch is
//!    abandoned (a commit that already started still completes)

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cycle::{run_cycle, CycleContext};
use crate::error::{CycleError, SourceError};
use crate::ingest::TrackedSource;
use crate::report::{ErrorReporter, Incident};
use crate::status::SourcePhase;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scheduler_cycles_total", "Finished poll cycles, by source and result.");
        describe_histogram!("scheduler_cycle_ms", "Poll cycle wall time in milliseconds.");
        describe_gauge!("scheduler_inflight_cycles", "Cycles currently holding a concurrency permit.");
    });
}

pub struct PollScheduler {
    ctx: CycleContext,
    sources: Vec<TrackedSource>,
    concurrency: usize,
    grace: Duration,
    reporter: Arc<dyn ErrorReporter>,
}

impl PollScheduler {
    pub fn new(
        ctx: CycleContext,
        sources: Vec<TrackedSource>,
        concurrency: usize,
        grace: Duration,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            ctx,
            sources,
            concurrency: concurrency.max(1),
            grace,
            reporter,
        }
    }

    /// Spawn the per-source tasks. The first poll of each source fires at once.
    pub fn start(self) -> SchedulerHandle {
        ensure_metrics_described();
        crate::ingest::ensure_metrics_described();

        self.ctx.status.reset(&self.sources);

        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::new();

        for source in self.sources {
            if !source.enabled {
                tracing::info!(target: "scheduler", source = %source.id, "source disabled in configuration");
                continue;
            }
            tracing::info!(
                target: "scheduler",
                source = %source.id,
                kind = source.adapter.kind(),
                interval_secs = source.interval.as_secs(),
                "starting poll loop"
            );
            tasks.push(tokio::spawn(source_loop(
                self.ctx.clone(),
                source,
                permits.clone(),
                self.reporter.clone(),
                shutdown.clone(),
                abort.clone(),
            )));
        }

        SchedulerHandle {
            shutdown,
            abort,
            tasks,
            grace: self.grace,
        }
    }
}

async fn source_loop(
    ctx: CycleContext,
    source: TrackedSource,
    permits: Arc<Semaphore>,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: CancellationToken,
    abort: CancellationToken,
) {
    let sid = source.id.clone();
    let mut ticker = tokio::time::interval(source.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            p = permits.clone().acquire_owned() => match p {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        gauge!("scheduler_inflight_cycles").increment(1.0);
        let started = Instant::now();
        let result = run_cycle(&ctx, &source, &abort).await;
        drop(permit);
        gauge!("scheduler_inflight_cycles").decrement(1.0);
        histogram!("scheduler_cycle_ms", "source" => sid.clone()).record(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(_) => {
                counter!("scheduler_cycles_total", "source" => sid.clone(), "result" => "ok").increment(1);
                ctx.status.cycle_ok(&sid);
                ctx.status.set_phase(&sid, SourcePhase::Idle);
            }
            Err(CycleError::Aborted) => {
                tracing::warn!(target: "scheduler", source = %sid, "cycle abandoned at shutdown");
                ctx.status.set_phase(&sid, SourcePhase::Idle);
                break;
            }
            Err(CycleError::Source(SourceError::Auth(msg))) => {
                counter!("scheduler_cycles_total", "source" => sid.clone(), "result" => "auth").increment(1);
                ctx.status.cycle_failed(&sid, &msg);
                ctx.status.set_phase(&sid, SourcePhase::Disabled);
                reporter.report(&Incident::SourceDisabled {
                    source_id: sid.clone(),
                    error: msg,
                });
                break;
            }
            Err(e) => {
                let label = match &e {
                    CycleError::Source(se) => se.kind(),
                    _ => "store",
                };
                counter!("scheduler_cycles_total", "source" => sid.clone(), "result" => label).increment(1);
                tracing::warn!(target: "scheduler", source = %sid, error = %e, "cycle skipped; retrying next interval");
                ctx.status.cycle_failed(&sid, &e.to_string());
                ctx.status.set_phase(&sid, SourcePhase::Idle);
            }
        }
    }
    tracing::debug!(target: "scheduler", source = %sid, "poll loop stopped");
}

/// Owns the running poll loops of one engine.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    abort: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl SchedulerHandle {
    /// Poll loops still alive (disabled sources drop out).
    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Stop new cycles, wait up to the grace period for in-flight ones, then
    /// abandon whatever is still fetching or dispatching.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let joined = futures::future::join_all(self.tasks);
        tokio::pin!(joined);
        tokio::select! {
            _ = &mut joined => return,
            _ = tokio::time::sleep(self.grace) => {
                tracing::warn!(
                    target: "scheduler",
                    grace_secs = self.grace.as_secs(),
                    "grace period expired; aborting in-flight cycles"
                );
                self.abort.cancel();
            }
        }
        for res in joined.await {
            if let Err(e) = res {
                tracing::error!(target: "scheduler", "poll task failed: {e}");
            }
        }
    }
}
