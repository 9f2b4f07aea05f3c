// tests/scheduler_lifecycle.rs
//
// Concurrency cap, auth disabling, interval alignment and graceful shutdown.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use tracker_notify::report::{Incident, OnceReporter, TracingReporter};
use tracker_notify::scheduler::PollScheduler;
use tracker_notify::status::SourcePhase;
use tracker_notify::SourceError;

#[tokio::test(start_paused = true)]
async fn never_more_than_k_cycles_in_flight() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let sources = (0..6)
        .map(|i| {
            let adapter = Arc::new(SlowSource {
                delay: Duration::from_secs(5),
                current: current.clone(),
                peak: peak.clone(),
                calls: calls.clone(),
            });
            tracked(&format!("s{i}"), adapter, Duration::from_secs(3600))
        })
        .collect();

    let ctx = context(FlakyStore::new(), router(&[], policy(1, 8, 3), Arc::new(TracingReporter)));
    let handle = PollScheduler::new(ctx, sources, 2, Duration::from_secs(30), Arc::new(TracingReporter)).start();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 6, "every source polled once at start");
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auth_failure_disables_source_and_reports_once() {
    let src = StaticSource::failing(SourceError::auth("HTTP 401"));
    let recorder = Arc::new(RecordingReporter::default());
    let reporter = Arc::new(OnceReporter::new(recorder.clone()));

    let ctx = context(FlakyStore::new(), router(&[], policy(1, 8, 3), Arc::new(TracingReporter)));
    let status = ctx.status.clone();
    let handle = PollScheduler::new(
        ctx,
        vec![tracked("private", src.clone(), Duration::from_secs(10))],
        4,
        Duration::from_secs(30),
        reporter,
    )
    .start();

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(src.calls(), 1, "disabled source is not polled again");
    assert_eq!(handle.running(), 0);
    assert_eq!(status.get("private").unwrap().phase, SourcePhase::Disabled);
    assert_eq!(recorder.count(), 1);
    assert!(matches!(&recorder.incidents.lock()[0], Incident::SourceDisabled { source_id, .. } if source_id == "private"));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transient_errors_keep_polling_on_interval() {
    let src = StaticSource::failing(SourceError::unavailable("502"));
    let ctx = context(FlakyStore::new(), router(&[], policy(1, 8, 3), Arc::new(TracingReporter)));
    let status = ctx.status.clone();
    let handle = PollScheduler::new(
        ctx,
        vec![tracked("flappy", src.clone(), Duration::from_secs(10))],
        1,
        Duration::from_secs(30),
        Arc::new(TracingReporter),
    )
    .start();

    // fires at 0, 10, 20, 30
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(src.calls(), 4);
    let st = status.get("flappy").unwrap();
    assert_eq!(st.phase, SourcePhase::Idle);
    assert!(st.last_error.unwrap().contains("502"));

    src.set(vec![item("a", "A")]);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(status.get("flappy").unwrap().last_success.is_some());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fire_times_stay_aligned_when_cycles_take_time() {
    let src = TimedSource::new(Duration::from_secs(3));
    let ctx = context(FlakyStore::new(), router(&[], policy(1, 8, 3), Arc::new(TracingReporter)));
    let origin = tokio::time::Instant::now();
    let handle = PollScheduler::new(
        ctx,
        vec![tracked("slow-feed", src.clone(), Duration::from_secs(10))],
        1,
        Duration::from_secs(30),
        Arc::new(TracingReporter),
    )
    .start();

    tokio::time::sleep(Duration::from_secs(45)).await;
    // a 3s fetch does not push later polls back
    assert_eq!(src.fire_secs(origin), vec![0, 10, 20, 30, 40]);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_sources_are_never_polled() {
    let src = StaticSource::new(vec![item("a", "A")]);
    let mut source = tracked("off", src.clone(), Duration::from_secs(1));
    source.enabled = false;

    let ctx = context(FlakyStore::new(), router(&[], policy(1, 8, 3), Arc::new(TracingReporter)));
    let handle = PollScheduler::new(ctx, vec![source], 1, Duration::from_secs(1), Arc::new(TracingReporter)).start();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(src.calls(), 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_in_flight_cycles_after_grace() {
    let store = FlakyStore::new();
    let stuck = Arc::new(SlowSource {
        delay: Duration::from_secs(3600),
        current: Default::default(),
        peak: Default::default(),
        calls: Default::default(),
    });
    let mut source = tracked("stuck", stuck, Duration::from_secs(7200));
    source.fetch_timeout = Duration::from_secs(7200);

    let ctx = context(store.clone(), router(&[], policy(1, 8, 3), Arc::new(TracingReporter)));
    let handle = PollScheduler::new(ctx, vec![source], 1, Duration::from_secs(5), Arc::new(TracingReporter)).start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let t0 = tokio::time::Instant::now();
    handle.shutdown().await;
    assert_eq!(t0.elapsed().as_secs(), 5);
    assert_eq!(store.commits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_in_flight_cycle_commit_within_grace() {
    let store = FlakyStore::new();
    let src = TimedSource::new(Duration::from_secs(3));
    let ctx = context(store.clone(), router(&[], policy(1, 8, 3), Arc::new(TracingReporter)));
    let handle = PollScheduler::new(
        ctx,
        vec![tracked("finishing", src.clone(), Duration::from_secs(3600))],
        1,
        Duration::from_secs(5),
        Arc::new(TracingReporter),
    )
    .start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let t0 = tokio::time::Instant::now();
    handle.shutdown().await;
    assert_eq!(t0.elapsed().as_secs(), 2, "waits for the fetch, not the whole grace");
    assert_eq!(store.commits.load(Ordering::SeqCst), 1);
    assert_eq!(src.started.lock().len(), 1);
}
