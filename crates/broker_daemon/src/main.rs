//! Session broker daemon entry point.

mod config;

use std::sync::Arc;

use broker_api::{ApiServer, Router};
use broker_core::telemetry::{self, TelemetryConfig};
use broker_lsp::{Session, SessionConfig};
use broker_watch::Watcher;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = config::Args::parse();

    let telemetry_config = match &args.log_dir {
        Some(dir) => TelemetryConfig::production(dir),
        None => TelemetryConfig::default(),
    };
    if let Err(e) = telemetry::init(telemetry_config) {
        eprintln!("failed to initialize telemetry: {e}");
    }

    info!(command = %args.command, workspace = %args.workspace.display(), port = args.port, "starting session broker daemon");

    if let Err(e) = run(args).await {
        error!(error = %e, fatal = e.is_fatal(), "session broker daemon exited with an error");
        std::process::exit(1);
    }
}

async fn run(args: config::Args) -> broker_core::Result<()> {
    let session_config = SessionConfig {
        command: args.command.clone(),
        args: args.lsp_args.clone(),
        workspace_root: args.workspace.clone(),
    };
    let session = Arc::new(Session::from_config(&session_config).await?);
    info!(pid = ?session.pid(), "lsp backend ready");

    let (shutdown_tx, _) = broadcast::channel(1);

    let watcher_config = config::watcher_config_from_env(args.workspace.clone());
    let watcher_session = session.clone();
    let progress = session.progress_tracker();
    let watcher_task = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let (_watcher, mut changes) = match Watcher::start(watcher_config, progress).await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to start file watcher");
                    return;
                }
            };

            loop {
                tokio::select! {
                    Some(changes) = changes.recv() => {
                        let params = broker_api::router::watched_changes_to_params(&changes);
                        if let Err(e) = watcher_session.did_change_watched_files(params).await {
                            error!(error = %e, "failed to forward watched file changes");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    };

    let router = Router::new(session.clone());
    let server = ApiServer::new(router, args.port);
    let server_shutdown = shutdown_tx.subscribe();

    tokio::select! {
        result = server.serve(server_shutdown) => {
            if let Err(e) = result {
                error!(error = %e, "api server failed");
            }
        }
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(());
    watcher_task.abort();
    session.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
