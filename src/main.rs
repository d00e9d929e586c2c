//! Entry point: parses CLI args, resolves config, wires the notification
//! hub and worker pool master behind one `axum` router, and serves until a
//! shutdown or reload signal arrives. Grounded on the teacher's
//! `Args`/`#[tokio::main] async fn main()` shape and its shutdown-future
//! `tokio::select!` pattern in `daemon/src/main.rs`, trimmed to this
//! service's single `serve` behaviour.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use concd::config::{Args, Config};
use concd::http::{build_router, AppState};
use concd::hub::Hub;
use concd::store::RedisConcCacheStore;
use concd::worker::{Master, MasterConfig, NullMaster, SharedMasterHandle};

#[derive(Clone, Copy)]
enum RunOutcome {
    Reload,
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match Config::resolve(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = concd::logging::setup_logging(&config.log_path);

    loop {
        tracing::info!(address = %config.api_server.address, "starting concd");
        match run_once(&config).await {
            Ok(RunOutcome::Shutdown) => {
                tracing::info!("concd shutting down");
                return Ok(());
            }
            Ok(RunOutcome::Reload) => {
                tracing::info!("reloading configuration");
                config = match Config::resolve(&args) {
                    Ok(config) => config,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to reload configuration, keeping previous config");
                        continue;
                    }
                };
            }
            Err(err) => {
                tracing::error!(error = %err, "concd exited with error");
                return Err(err);
            }
        }
    }
}

async fn run_once(config: &Config) -> anyhow::Result<RunOutcome> {
    let store = RedisConcCacheStore::connect(&config.cache_db).await?;
    let hub = Hub::spawn(Arc::new(store));

    let pool_size = config.worker_master.pool_size;
    let master: SharedMasterHandle = if pool_size > 0 {
        let (master, ready) = Master::start(MasterConfig::from(config)).await;
        tracing::info!(ready, pool_size, "worker pool started");
        master
    } else {
        Arc::new(NullMaster)
    };

    let state = AppState {
        hub: hub.clone(),
        master: master.clone(),
        allowed_origins: Arc::new(config.api_server.allowed_origins.clone()),
        started_at: Instant::now(),
    };

    let router = build_router(state, &config.api_server.url_path_root);
    let listener = tokio::net::TcpListener::bind(&config.api_server.address).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let outcome = Arc::new(std::sync::Mutex::new(RunOutcome::Shutdown));
    let outcome_for_signal = outcome.clone();

    tokio::spawn(async move {
        let reason = wait_for_termination_signal().await;
        *outcome_for_signal.lock().expect("outcome mutex poisoned") = reason;
        let _ = shutdown_tx.send(());
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await?;

    hub.shutdown(Duration::from_secs(5)).await;
    master.stop().await;

    let outcome = *outcome.lock().expect("outcome mutex poisoned");
    Ok(outcome)
}

/// Waits for SIGTERM/Ctrl-C (shutdown) or SIGHUP (reload). On non-Unix
/// targets only Ctrl-C is available and always yields a shutdown.
async fn wait_for_termination_signal() -> RunOutcome {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup =
            signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => RunOutcome::Shutdown,
            _ = sigterm.recv() => RunOutcome::Shutdown,
            _ = sighup.recv() => RunOutcome::Reload,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        RunOutcome::Shutdown
    }
}
