//! scyd-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables and the TOML file.
//! 2. Initialise structured tracing (JSON when `SCYD_LOG_JSON` is set).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Build the download orchestrator and reconcile interrupted records.
//! 5. Build the Axum router and serve until SIGINT/SIGTERM.
//! 6. Cancel whatever is still downloading.

mod command;
mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod schemas;
mod session;
mod sorter;
mod state;

use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scyd_core::{DownloadSorter, Hooks, Orchestrator, OrchestratorConfig};
use tracing::{info, warn};

use crate::command::YtDlpCommand;
use crate::config::{Config, UserConfig};
use crate::db::sqlite::SqliteStore;
use crate::session::SessionStore;
use crate::sorter::LibrarySorter;
use crate::state::AppState;

/// Grace period for running downloads once the HTTP server has stopped.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Cover art yt-dlp leaves behind after embedding it.
const COVER_ART: &str = "cover.jpg";

/// yt-dlp download server with live progress streaming
#[derive(Parser)]
#[command(name = "scyd-server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Print an argon2 hash for a `[users.<name>]` entry in the config file
    ///
    /// Reads the password from the first line of stdin when not given.
    HashPassword {
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::HashPassword { password } => hash_password(password),
    }
}

fn hash_password(password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).context("failed to read stdin")?;
            line.trim_end_matches(['\r', '\n']).to_owned()
        }
    };
    anyhow::ensure!(!password.is_empty(), "password must not be empty");
    let hash = session::hash_password(&password)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    println!("{hash}");
    Ok(())
}

async fn serve() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: SCYD_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %cfg.environment,
        "scyd-server starting"
    );

    let settings = UserConfig::load(&cfg.config_path)?;
    settings.ensure_directories()?;
    if settings.users.is_empty() {
        warn!(path = %cfg.config_path.display(), "no users configured; nobody can log in");
    }

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url).await?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Orchestrator ────────────────────────────────────────────────────────
    let hooks = match Hooks::parse(
        settings.hooks.on_download_complete.as_deref(),
        settings.hooks.on_error.as_deref(),
    ) {
        Ok(hooks) => hooks,
        Err(e) => {
            warn!(error = %e, "ignoring malformed hook configuration");
            Hooks::default()
        }
    };

    let sorter = Arc::new(LibrarySorter::new(&settings.download_dir, &settings.output_dir));
    let commands = YtDlpCommand::new(&settings.download_dir, cfg.environment.is_development());
    let mut orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(commands),
        OrchestratorConfig {
            event_buffer: cfg.event_buffer,
            transient_artifacts: vec![settings.download_dir.join(COVER_ART)],
            ..OrchestratorConfig::default()
        },
    )
    .with_hooks(hooks);
    if settings.sort_after_download {
        orchestrator = orchestrator.with_sorter(Arc::clone(&sorter) as Arc<dyn DownloadSorter>);
    }
    orchestrator.recover_interrupted().await?;

    let sessions = Arc::new(SessionStore::new(cfg.session_ttl));
    sessions.spawn_sweeper();

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        settings: Arc::new(settings),
        orchestrator: orchestrator.clone(),
        sessions,
        sorter,
    });

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    // ── 6. Stop running downloads ──────────────────────────────────────────────
    // Event streams stay open until their task ends, so tasks are cancelled
    // before axum waits for connections to drain.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            orchestrator.shutdown(SHUTDOWN_TIMEOUT).await;
        })
        .await?;

    info!("scyd-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
