use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use dockhand::config::Config;
use dockhand::store::{self, AppState, MemoryStore, PathLocks, PgStore, Store};
use dockhand::sync::{self, SyncContext};

/// Mirror Quay containers, build tags and source files into a local store.
#[derive(Parser, Debug)]
#[command(name = "dockhand", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default).
    Serve {
        /// Keep everything in memory instead of Postgres.
        #[arg(long)]
        memory: bool,
    },
    /// Run one refresh cycle for a user and print the resulting containers.
    Refresh {
        #[arg(long, env = "DOCKHAND_USER")]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("DOCKHAND_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    let cfg = Config::load();

    match args.command.unwrap_or(Command::Serve { memory: false }) {
        Command::Serve { memory } => serve(cfg, memory).await,
        Command::Refresh { user } => refresh_once(cfg, user).await,
    }
}

async fn build_state(cfg: Config, memory: bool) -> anyhow::Result<AppState> {
    let store: Arc<dyn Store> = if memory {
        tracing::warn!("using in-memory store, nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PgStore::connect(&cfg.database_url).await?)
    };

    Ok(AppState {
        store,
        http: cfg.http_client().context("building http client")?,
        locks: Arc::new(PathLocks::new()),
        config: Arc::new(cfg),
        shutdown: CancellationToken::new(),
    })
}

async fn serve(cfg: Config, memory: bool) -> anyhow::Result<()> {
    let state = build_state(cfg, memory).await?;

    // Create the admin user on first run
    store::bootstrap::run(state.store.as_ref(), state.config.admin_token.as_deref()).await?;

    let addr: SocketAddr = state.config.listen.parse()?;
    let shutdown = state.shutdown.clone();
    let app = dockhand::app(state);

    tracing::info!(%addr, "starting dockhand");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    tracing::info!("dockhand stopped");
    Ok(())
}

async fn refresh_once(cfg: Config, user: Uuid) -> anyhow::Result<()> {
    let state = build_state(cfg, false).await?;
    let ctx = SyncContext::from_state(&state);

    let cancel = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let containers = sync::refresh(&ctx, user, &state.shutdown).await?;
    println!("{}", serde_json::to_string_pretty(&containers)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    tracing::info!("shutdown signal received");
}
