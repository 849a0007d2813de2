//! Relay orchestrator entrypoint: CLI, config loading, and the HTTP server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay::app::Core;
use relay_dispatch::ConfigStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "relay", about = "Distributed job orchestrator for image/video generation fleets")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short = 'c', long, global = true, default_value = "relay.toml")]
    config: PathBuf,

    /// Enable verbose (debug) logging to stderr, in addition to the rolling
    /// log file.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator: HTTP API, Worker Pool, and Node Manager.
    Serve {
        /// Override the bind address from the config file.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Load and validate the config file, then exit.
    CheckConfig,
    /// Print fleet/node status without starting the HTTP server.
    Diagnose,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("{err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: Cli) -> Result<()> {
    let store = ConfigStore::load(cli.config.clone())
        .with_context(|| format!("loading config file {}", cli.config.display()))?;

    let runtime = tokio::runtime::Runtime::new().context("building the Tokio runtime")?;

    match cli.command {
        Commands::Serve { bind } => {
            relay_logging::init_logging(relay_logging::LogConfig {
                app_name: "relay",
                verbose: cli.verbose,
            })?;
            runtime.block_on(serve(store, bind))
        }
        Commands::CheckConfig => {
            let config = runtime.block_on(store.current());
            println!("{} is valid", cli.config.display());
            println!("mode: {}", if config.is_fleet_mode() { "fleet" } else { "single-node" });
            Ok(())
        }
        Commands::Diagnose => runtime.block_on(diagnose(store)),
    }
}

async fn serve(store: ConfigStore, bind_override: Option<String>) -> Result<()> {
    let mut config = (*store.current().await).clone();
    if let Some(bind) = bind_override {
        config.bind_addr = bind;
    }
    let bind_addr = config.bind_addr.clone();

    let core = Core::build(Arc::new(config)).await.context("building orchestrator core")?;
    core.spawn_background_tasks();

    let app = relay::http::router(Arc::clone(&core));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    info!("listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("shutdown complete");
    Ok(())
}

async fn diagnose(store: ConfigStore) -> Result<()> {
    let config = store.current().await;
    let core = Core::build(config).await.context("building orchestrator core")?;
    let stats = core.node_manager.cluster_stats().await;
    println!("{stats:#?}");
    Ok(())
}

/// Resolves once on Ctrl+C or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing the Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing the SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
