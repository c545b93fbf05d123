//! stonectl daemon
//!
//! Reconciles a fleet of storage daemons against declarative service specs.
//! Serves the operator API over axum while a kameo actor owns all
//! orchestrator state and a ticker drives the reconciliation loop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use eyre::WrapErr;
use kameo::actor::Spawn;
use stonectl_core::{
    AddHost, ListHosts, OrchestratorActor, OrchestratorActorArgs, spawn_ticker,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod factory;
mod router;
mod state;

use config::{Config, LogFormat};
use state::AppState;

#[derive(Parser)]
#[command(name = "stonectl", about = "Declarative daemon-fleet reconciliation daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the bind address from the configuration
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match config.daemon.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let mut config = Config::load_default(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    init_tracing(&config);
    info!(bind = %config.daemon.bind, "stonectl starting");

    let collaborators = factory::create_collaborators(&config)?;
    let orchestrator = OrchestratorActor::spawn(OrchestratorActorArgs {
        config: config.orchestrator.clone(),
        collaborators,
    });

    // fails if the actor could not load its state
    let known = orchestrator
        .ask(ListHosts)
        .await
        .map_err(|e| eyre::eyre!("orchestrator failed to start: {e:?}"))?;
    for host in &config.host {
        if known.iter().any(|h| h.hostname == host.name) {
            continue;
        }
        match orchestrator.ask(AddHost { spec: host.to_spec() }).await {
            Ok(msg) => info!(host = %host.name, "{msg}"),
            Err(e) => warn!(host = %host.name, error = ?e, "failed to add configured host"),
        }
    }

    let ticker = spawn_ticker(orchestrator.clone(), config.orchestrator.tick_interval());

    let bind = config.daemon.bind.clone();
    let state = Arc::new(AppState::new(orchestrator.clone(), config));
    let app = router::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .wrap_err_with(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    if let Err(e) = orchestrator.stop_gracefully().await {
        warn!(error = ?e, "orchestrator did not stop cleanly");
    }
    info!("stonectl stopped");
    Ok(())
}
