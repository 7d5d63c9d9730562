//! wfm-gt (WFM Geo Toolkit) - Main entry point
//!
//! `serve` (the default) runs the HTTP API together with the background job
//! worker. `create-user` and `rotate-token` manage API tokens and print the
//! plaintext token once.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wfm_common::api::auth::{create_user, rotate_token};
use wfm_common::config::{load_toml_config, CliOverrides, ToolkitConfig};
use wfm_common::db::init::init_database;
use wfm_common::events::EventBus;
use wfm_gt::db::{notifications, RuntimeSettings};
use wfm_gt::{build_router, jobs, AppState};

/// Command-line arguments for wfm-gt
#[derive(Parser, Debug)]
#[command(name = "wfm-gt")]
#[command(about = "WFM Geo Toolkit: known places, IP ranges and business structure")]
#[command(version)]
struct Args {
    /// Folder holding the database (overrides WFM_GT_ROOT_FOLDER)
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Address to bind (overrides WFM_GT_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to listen on (overrides WFM_GT_PORT)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// TOML config file (overrides WFM_GT_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Create a user and print their API token
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Replace a user's API token and print the new one
    RotateToken {
        #[arg(long)]
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cli = CliOverrides {
        root_folder: args.root_folder.clone(),
        host: args.host.clone(),
        port: args.port,
        config_file: args.config.clone(),
    };
    let toml_config = load_toml_config(cli.config_file.as_deref())
        .context("Failed to load configuration file")?;
    let config = ToolkitConfig::resolve(&cli, toml_config.as_ref())
        .context("Failed to resolve configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "wfm_gt={level},wfm_common={level},tower_http=info",
                    level = config.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting WFM Geo Toolkit (wfm-gt) v{}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", config.root_folder.display());

    config
        .ensure_root_folder()
        .context("Failed to create root folder")?;
    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await,
        Command::CreateUser { name, email } => {
            let (user, token) = create_user(&pool, &name, &email)
                .await
                .context("Failed to create user")?;
            info!("Created user {} <{}>", user.id, user.email);
            println!("{}", token);
            Ok(())
        }
        Command::RotateToken { email } => {
            let token = rotate_token(&pool, &email)
                .await
                .context("Failed to rotate token")?;
            info!("Rotated API token for {}", email);
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(config: ToolkitConfig, pool: sqlx::SqlitePool) -> Result<()> {
    let settings = RuntimeSettings::load(&pool)
        .await
        .context("Failed to load settings")?;
    match notifications::prune_read(&pool, settings.notification_retention_days).await {
        Ok(0) => {}
        Ok(pruned) => info!("Pruned {} read notifications", pruned),
        Err(e) => warn!("Failed to prune notifications: {}", e),
    }

    let bus = EventBus::new(config.event_capacity);
    let (job_queue, worker) = jobs::spawn_worker(pool.clone(), bus.clone());

    let state = AppState::new(pool, bus, job_queue, config.har_max_upload_bytes);
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("wfm-gt listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Queued jobs are not persisted
    worker.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
