//! betrelay — bet intake relay
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the message bus, loads bookie accounts, and runs the listener
//! until Ctrl+C, then drains worker pools and closes the bus.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use betrelay::bookies::{self, BookieConfigSource, BookieRegistry, HttpConfigSource, StaticConfigSource};
use betrelay::config::{self, AppConfig, BookieSourceKind, BusKind, ExecutorMode};
use betrelay::engine::reconcile::{spawn_reconciler, CycleReconciler, CycleShard};
use betrelay::engine::{BetListener, Publisher};
use betrelay::executor::{BetExecutor, DryRunExecutor, HttpExecutor, OtpStore};
use betrelay::stats::RelayStats;
use betrelay::status::{self, StatusState};
use betrelay::transport::memory::MemoryBus;
use betrelay::transport::nats::NatsBus;
use betrelay::transport::MessageBus;

const BANNER: &str = r#"
  _          _            _
 | |__   ___| |_ _ __ ___| | __ _ _   _
 | '_ \ / _ \ __| '__/ _ \ |/ _` | | | |
 | |_) |  __/ |_| | |  __/ | (_| | |_| |
 |_.__/ \___|\__|_|  \___|_|\__,_|\__, |
                                  |___/
  Bet intake & arbitrage-cycle relay
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("BETRELAY_CONFIG").unwrap_or_else(|_| config::DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        listener = %cfg.listener.name,
        config = %config_path,
        bus = ?cfg.bus.kind,
        executor = ?cfg.executor.mode,
        owned = ?cfg.listener.bookies,
        "betrelay starting up"
    );

    // -- Transport ---------------------------------------------------------

    let bus: Arc<dyn MessageBus> = match cfg.bus.kind {
        BusKind::Nats => {
            let url = NatsBus::resolve_url(&cfg.bus.url_env);
            Arc::new(
                NatsBus::connect(&url)
                    .await
                    .context("Failed to connect to message bus")?,
            )
        }
        BusKind::Memory => {
            warn!("Using the in-process bus; no external producer can reach this listener");
            Arc::new(MemoryBus::new())
        }
    };

    let cancel = CancellationToken::new();
    let result = run(&cfg, bus.clone(), cancel.clone()).await;

    // Whatever happened, stop background tasks and release the bus.
    cancel.cancel();
    if let Err(e) = bus.close().await {
        warn!(error = %e, "Error closing message bus");
    }
    if let Err(ref e) = result {
        error!(error = %e, "betrelay exited with error");
    }
    result
}

/// Everything after the bus is up. Returns on Ctrl+C or startup failure.
async fn run(cfg: &AppConfig, bus: Arc<dyn MessageBus>, cancel: CancellationToken) -> Result<()> {
    // -- Bookie accounts ---------------------------------------------------

    let source = build_config_source(cfg)?;
    let registry = Arc::new(BookieRegistry::new());
    bookies::load_initial(source.as_ref(), &registry).await?;

    let mut background: Vec<JoinHandle<()>> = Vec::new();
    if cfg.bookies.source == BookieSourceKind::Http {
        background.push(tokio::spawn(bookies::watch(
            registry.clone(),
            source.clone(),
            Duration::from_secs(cfg.bookies.reload_interval_secs.max(1)),
            cancel.clone(),
        )));
    }

    // -- Execution ---------------------------------------------------------

    let otp = Arc::new(OtpStore::new());
    let stats = Arc::new(RelayStats::new());
    let executor: Arc<dyn BetExecutor> = match cfg.executor.mode {
        ExecutorMode::DryRun => {
            info!("Dry-run executor: bets are logged, not placed");
            Arc::new(DryRunExecutor::new())
        }
        ExecutorMode::Http => {
            let endpoint = AppConfig::resolve_env(&cfg.executor.endpoint_env)?;
            info!(endpoint = %endpoint, "Using automation sidecar executor");
            Arc::new(HttpExecutor::new(
                endpoint,
                otp.clone(),
                Duration::from_secs(cfg.executor.request_timeout_secs),
            )?)
        }
    };

    // -- Listener ----------------------------------------------------------

    let settings = cfg.listener_settings();
    let listener = BetListener::new(
        bus.clone(),
        registry.clone(),
        executor,
        otp,
        stats.clone(),
        settings.clone(),
    );
    let listener_id = listener.id().to_string();
    let handle = listener
        .start(cancel.clone())
        .await
        .context("Failed to start bet listener")?;

    if cfg.reconcile.enabled {
        let mut cycles = CycleReconciler::new(settings.gate.expected_legs, cfg.reconcile_window());
        if cfg.reconcile.shard_cycles {
            let primary = cfg.listener.bookies.first().map(String::as_str).unwrap_or_default();
            let shard = CycleShard::from_registry(&registry, primary).with_context(|| {
                format!("Primary bookie {primary} is not in the bookie config; cannot shard cycles")
            })?;
            cycles = cycles.with_shard(shard);
        }
        let reconciler = spawn_reconciler(
            bus.clone(),
            Publisher::new(bus.clone(), stats.clone()),
            cycles,
            settings.sweep_interval,
            cancel.clone(),
        )
        .await
        .context("Failed to start cycle reconciler")?;
        background.push(reconciler);
    }

    if cfg.status.enabled {
        let state = Arc::new(StatusState {
            listener_id: listener_id.clone(),
            bus: bus.name().to_string(),
            stats: stats.clone(),
            registry: registry.clone(),
            owned: cfg.listener.bookies.clone(),
        });
        background.push(status::spawn_status_server(state, cfg.status.port, cancel.clone()).await?);
    }

    info!(listener_id = %listener_id, "Listening. Press Ctrl+C to stop.");

    // -- Run until shutdown ------------------------------------------------

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received.");

    cancel.cancel();
    handle.shutdown().await;
    for task in background {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    let snap = stats.snapshot();
    info!(
        received = snap.received,
        accepted = snap.accepted,
        duplicates = snap.duplicates,
        invalid = snap.invalid,
        placed = snap.placed,
        failed = snap.failed,
        cycles = snap.cycles_completed,
        expired = snap.cycles_expired,
        "betrelay shut down cleanly."
    );
    Ok(())
}

fn build_config_source(cfg: &AppConfig) -> Result<Arc<dyn BookieConfigSource>> {
    Ok(match cfg.bookies.source {
        BookieSourceKind::Static => Arc::new(StaticConfigSource::new(cfg.bookies.accounts.clone())),
        BookieSourceKind::Http => {
            let url_env = cfg
                .bookies
                .url_env
                .as_deref()
                .context("bookies.url_env is required for the http source")?;
            let url = AppConfig::resolve_env(url_env)?;
            let token = cfg
                .bookies
                .token_env
                .as_deref()
                .and_then(|env| std::env::var(env).ok());
            Arc::new(HttpConfigSource::new(url, token)?)
        }
    })
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("betrelay=info"));

    let json_logging = std::env::var("BETRELAY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
