use std::{env, io, path::PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use genrelay_server::{config, CliOverrides};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "genrelay", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to genrelay.toml (falls back to GENRELAY_CONFIG)
    #[arg(long = "config", value_name = "FILE")]
    config_path: Option<PathBuf>,

    /// Workspace root that output paths resolve against
    #[arg(long = "root", value_name = "PATH")]
    root: Option<PathBuf>,

    /// Host binding for the HTTP server
    #[arg(long = "host", value_name = "HOST")]
    host: Option<String>,

    /// Port binding for the HTTP server
    #[arg(long = "port", value_name = "PORT")]
    port: Option<u16>,

    /// Bearer tokens provided via CLI
    #[arg(long = "auth-token", value_name = "TOKEN")]
    auth_tokens: Vec<String>,

    /// Path to JSON file containing authorized tokens
    #[arg(long = "tokens-file", value_name = "FILE")]
    tokens_file: Option<PathBuf>,

    /// Additional CORS allowed origins
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    cors_origins: Vec<String>,

    /// Log filter (e.g. info, debug, genrelay_jobs=trace)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(long = "debug", action = ArgAction::SetTrue)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args);
    tracing::info!(
        "{}",
        genrelay_build_info::formatted_banner("genrelay", SERVER_VERSION)
    );

    let config_path = args
        .config_path
        .clone()
        .or_else(|| env::var_os("GENRELAY_CONFIG").map(PathBuf::from));
    let cli = CliOverrides {
        root: args.root.clone(),
        host: args.host.clone(),
        port: args.port,
        tokens: args.auth_tokens.clone(),
        tokens_file: args.tokens_file.clone(),
        cors_origins: args.cors_origins.clone(),
    };

    let cwd = env::current_dir().context("Failed to determine current directory")?;
    let config = config::load(config_path.as_deref(), &cli, &cwd)?;

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    genrelay_server::run(config, shutdown).await
}

fn init_tracing(args: &Args) {
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else if let Some(level) = &args.log_level {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn spawn_signal_handlers(shutdown: CancellationToken) {
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C; shutting down");
            ctrl_c.cancel();
        }
    });

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                tracing::info!("Received SIGTERM; shutting down");
                shutdown.cancel();
            }
        });
    }
}
