//! rippled — the Ripple demo server.
//!
//! Loads `ripple.toml` (optional), initializes logging, and serves the
//! pipeline routes until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! rippled serve --config ripple.toml --port 8080
//! rippled config > ripple.toml
//! ```

use std::future::{Future, IntoFuture};
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use clap::{Parser, Subcommand, ValueEnum};
use ripple_core::RippleConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,rippled=debug,ripple_api=debug,ripple_core=debug";

#[derive(Parser)]
#[command(name = "rippled", about = "Ripple reactive pipeline demo server")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the demo routes.
    Serve {
        /// Path to a ripple.toml file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides the config file).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the default configuration as TOML.
    Config,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = match config {
                Some(path) => {
                    let loaded = RippleConfig::from_file(&path)?;
                    info!(path = %path.display(), "configuration loaded");
                    loaded
                }
                None => RippleConfig::default(),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Command::Config => {
            print!("{}", RippleConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn serve(config: RippleConfig) -> anyhow::Result<()> {
    let addr = config.server.bind_addr();
    let grace = config.server.shutdown_grace();
    let router = ripple_api::build_router(config.api);

    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "ripple server listening");

    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for ctrl-c; shutting down");
        }
    };
    serve_until(listener, router, ctrl_c, grace).await?;

    info!("ripple server stopped");
    Ok(())
}

/// Serve until `shutdown` resolves, then drain open connections for at
/// most `grace` before dropping them.
async fn serve_until<S>(listener: TcpListener, router: Router, shutdown: S, grace: Duration) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let mut server = tokio::spawn(
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .into_future(),
    );

    tokio::select! {
        finished = &mut server => return Ok(finished??),
        () = shutdown => info!("shutdown signal received"),
    }
    let _ = stop_tx.send(true);

    match tokio::time::timeout(grace, &mut server).await {
        Ok(finished) => finished??,
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "connections still open after grace period; closing");
            server.abort();
        }
    }
    Ok(())
}
