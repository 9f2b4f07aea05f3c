//! # Engine
//! Everything one configuration produces: sinks, the dispatch router, tracked
//! sources and their scheduler. Built (and validated) in one step, started,
//! and torn down as a whole; a configuration reload builds a new engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::cycle::CycleContext;
use crate::dispatch::DispatchRouter;
use crate::error::ConfigError;
use crate::history::History;
use crate::ingest::registry::SourceRegistry;
use crate::ingest::TrackedSource;
use crate::notify::registry::SinkRegistry;
use crate::notify::NotificationSink;
use crate::report::{ErrorReporter, OnceReporter, SinkReporter, TracingReporter};
use crate::scheduler::{PollScheduler, SchedulerHandle};
use crate::status::StatusBoard;
use crate::store::StateStore;

const SECS_PER_DAY: u64 = 86_400;

/// A validated, not yet running engine.
pub struct Engine {
    scheduler: PollScheduler,
    router: Arc<DispatchRouter>,
    source_ids: Vec<String>,
}

impl Engine {
    /// Validate `cfg` and resolve every source and sink kind. Nothing runs yet.
    pub fn build(
        cfg: &AppConfig,
        sources: &SourceRegistry,
        sinks: &SinkRegistry,
        store: Arc<dyn StateStore>,
        status: Arc<StatusBoard>,
        history: Arc<History>,
    ) -> Result<Self, ConfigError> {
        cfg.validate(sources, sinks)?;

        let mut sink_map: BTreeMap<String, Arc<dyn NotificationSink>> = BTreeMap::new();
        for sc in &cfg.sinks {
            let sink = sinks.build(&sc.id, &sc.kind, sc)?;
            sink_map.insert(sc.id.clone(), sink);
        }

        let reporter: Arc<dyn ErrorReporter> = match &cfg.reporting.sink {
            Some(id) => {
                let sink = sink_map
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ConfigError::invalid(format!("reporting sink `{id}` is not defined")))?;
                Arc::new(OnceReporter::new(SinkReporter::new(id.clone(), sink)))
            }
            None => Arc::new(OnceReporter::new(TracingReporter)),
        };

        let router = Arc::new(DispatchRouter::new(
            sink_map,
            cfg.subscriptions.clone(),
            cfg.retry_policy(),
            reporter.clone(),
            history,
        ));

        let mut tracked = Vec::with_capacity(cfg.sources.len());
        for sc in &cfg.sources {
            let adapter = sources.build(&sc.id, &sc.kind, sc)?;
            tracked.push(TrackedSource {
                id: sc.id.clone(),
                endpoint: sc.endpoint.clone(),
                interval: sc.interval(&cfg.scheduler),
                fetch_timeout: sc.fetch_timeout(&cfg.scheduler),
                enabled: sc.enabled,
                adapter,
            });
        }
        for t in &tracked {
            if router.sinks_for(&t.id).is_empty() {
                tracing::warn!(target: "scheduler", source = %t.id, "no subscription routes this source to a sink");
            }
        }
        let source_ids = tracked.iter().map(|t| t.id.clone()).collect();

        let ctx = CycleContext {
            store,
            router: router.clone(),
            retention: cfg
                .store
                .retention_days
                .map(|d| Duration::from_secs(d.saturating_mul(SECS_PER_DAY))),
            status,
        };
        let scheduler = PollScheduler::new(
            ctx,
            tracked,
            cfg.scheduler.concurrency,
            Duration::from_secs(cfg.scheduler.shutdown_grace_secs),
            reporter,
        );

        Ok(Self {
            scheduler,
            router,
            source_ids,
        })
    }

    pub fn source_ids(&self) -> &[String] {
        &self.source_ids
    }

    pub fn router(&self) -> &Arc<DispatchRouter> {
        &self.router
    }

    pub fn start(self) -> RunningEngine {
        tracing::info!(target: "scheduler", sources = self.source_ids.len(), "engine starting");
        RunningEngine {
            handle: self.scheduler.start(),
        }
    }
}

pub struct RunningEngine {
    handle: SchedulerHandle,
}

impl RunningEngine {
    pub fn running_sources(&self) -> usize {
        self.handle.running()
    }

    /// Graceful stop; see [`SchedulerHandle::shutdown`].
    pub async fn shutdown(self) {
        tracing::info!(target: "scheduler", "engine shutting down");
        self.handle.shutdown().await;
        tracing::info!(target: "scheduler", "engine stopped");
    }
}
