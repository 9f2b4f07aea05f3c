//! tracker-notify — Binary Entrypoint
//! Loads configuration, opens the state store, runs the polling engine and
//! (optionally) the status HTTP server. SIGHUP reloads the configuration.
//!
//! Exit codes: 0 clean shutdown, 2 configuration / store initialization
//! failure, 1 any other fatal error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tracker_notify::api::{self, AppState};
use tracker_notify::config::{self, AppConfig, StatusSettings};
use tracker_notify::history::History;
use tracker_notify::metrics::Metrics;
use tracker_notify::status::StatusBoard;
use tracker_notify::store::{self, StateStore};
use tracker_notify::{builtin_sinks, builtin_sources, Engine, SinkRegistry, SourceRegistry};

const DEFAULT_LOG_FILTER: &str =
    "tracker_notify=info,scheduler=info,dispatch=info,ingest=info,store=info,notify=info,warn";
const HISTORY_CAPACITY: usize = 2000;

enum Fatal {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Fatal::Startup(e)) => {
            tracing::error!("startup failed: {e:#}");
            ExitCode::from(2)
        }
        Err(Fatal::Runtime(e)) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), Fatal> {
    let cfg = config::load_default().map_err(|e| Fatal::Startup(e.into()))?;
    let store = store::open(&cfg.store)
        .await
        .map_err(|e| Fatal::Startup(e.into()))?;

    let sources = builtin_sources();
    let sinks = builtin_sinks();
    let status = Arc::new(StatusBoard::new());
    let history = Arc::new(History::with_capacity(HISTORY_CAPACITY));

    let engine = Engine::build(&cfg, &sources, &sinks, store.clone(), status.clone(), history.clone())
        .map_err(|e| Fatal::Startup(e.into()))?;
    let mut running = engine.start();

    if let Some(settings) = &cfg.status {
        serve_status(settings, &cfg, status.clone(), history.clone())
            .await
            .map_err(Fatal::Runtime)?;
    }

    let mut signals = Signals::new().map_err(Fatal::Runtime)?;
    loop {
        match signals.next().await {
            Signal::Stop => break,
            Signal::Reload => {
                match rebuild(&sources, &sinks, store.clone(), status.clone(), history.clone()) {
                    Ok(next) => {
                        tracing::info!("configuration reloaded; restarting engine");
                        running.shutdown().await;
                        running = next.start();
                    }
                    Err(e) => tracing::error!("reload rejected, keeping current engine: {e:#}"),
                }
            }
        }
    }

    running.shutdown().await;
    Ok(())
}

/// Store and status settings only take effect on restart.
fn rebuild(
    sources: &SourceRegistry,
    sinks: &SinkRegistry,
    store: Arc<dyn StateStore>,
    status: Arc<StatusBoard>,
    history: Arc<History>,
) -> anyhow::Result<Engine> {
    let cfg = config::load_default()?;
    Ok(Engine::build(&cfg, sources, sinks, store, status, history)?)
}

async fn serve_status(
    settings: &StatusSettings,
    cfg: &AppConfig,
    status: Arc<StatusBoard>,
    history: Arc<History>,
) -> anyhow::Result<()> {
    let metrics = Metrics::init(cfg.scheduler.concurrency)?;
    let app = api::router(AppState { status, history }).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("binding status server to {}", settings.bind))?;
    tracing::info!(bind = %settings.bind, "status server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("status server stopped: {e}");
        }
    });
    Ok(())
}

enum Signal {
    Stop,
    Reload,
}

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> anyhow::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
            hup: signal(SignalKind::hangup()).context("installing SIGHUP handler")?,
        })
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => Signal::Stop,
            _ = self.term.recv() => Signal::Stop,
            _ = self.hup.recv() => Signal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> anyhow::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Signal {
        let _ = tokio::signal::ctrl_c().await;
        Signal::Stop
    }
}
