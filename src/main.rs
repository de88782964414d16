//! trove: serve a directory tree over HTTP, with cached thumbnails, lossy
//! re-encodes and zip downloads, gated by per-path secrets.

mod error;
mod http;
mod service;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use exn::ResultExt;
use tokio::net::TcpListener;
use trove_access::{AccessGate, JsonFileSource};
use trove_codec::ImageEncoder;
use trove_config::Config;

use crate::error::{ErrorKind, Result};
use crate::service::Service;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to `trove.toml` in
    /// the platform configuration directory, if present.
    #[arg(short, long, env = "TROVE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "Server stopped");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Startup)?;
    for dir in [&config.thumbnail_root, &config.lossy_root, &config.archive_root] {
        trove_storage::create_dir_all(dir).or_raise(|| ErrorKind::Startup)?;
    }

    let gate = Arc::new(AccessGate::new(Arc::new(JsonFileSource::new(&config.secrets_file))));
    match gate.reload().await {
        Ok(rules) => tracing::info!(rules, file = %config.secrets_file.display(), "Secret table loaded"),
        Err(err) => {
            tracing::warn!(error = %err, file = %config.secrets_file.display(), "Could not load secret table; no paths are protected")
        },
    }
    let reload = gate.clone().spawn_reload(config.secrets_reload());

    let mut service = Service::new(&config, gate, Arc::new(ImageEncoder))?;
    if let Err(err) = service.archives().sweep().await {
        tracing::warn!(error = %err, "Could not sweep archive directory");
    }
    if config.precache {
        service.spawn_background(config.precache_debounce());
    }
    let service = Arc::new(service);

    let listener = TcpListener::bind(config.listen).await.or_raise(|| ErrorKind::Startup)?;
    tracing::info!(listen = %config.listen, root = %config.served_root.display(), "Serving files");
    let served = axum::serve(listener, http::router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .or_raise(|| ErrorKind::Internal);

    service.shutdown();
    reload.abort();
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
