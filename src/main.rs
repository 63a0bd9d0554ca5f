mod background;
mod cache;
mod catalog;
mod config;
mod controller;
mod error;
mod keys;
mod metadata;
mod processor;
mod routes;
mod storage;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;
use poem::listener::TcpListener;
use poem::{Route, Server};
use poem_openapi::OpenApiService;
use tracing::Level;

use crate::controller::ImageController;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "imagehost")]
#[command(version, about)]
pub struct ServerConfig {
    /// The host to bind the server to.
    #[arg(long, env, default_value = "127.0.0.1")]
    host: String,

    /// The port to bind the server to.
    #[arg(long, env, default_value = "8000")]
    port: u16,

    /// The external URL the server is reachable at, used for the docs.
    #[arg(long, env)]
    docs_url: Option<String>,

    /// The file path to the runtime YAML config.
    #[arg(long, env)]
    config_file: PathBuf,

    /// The log level filter to use.
    #[arg(long, env, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: ServerConfig = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let cfg = config::RuntimeConfig::from_file(&args.config_file).await?;
    let controller = ImageController::from_config(&cfg).await?;
    let background = controller.background().clone();

    let bind = format!("{}:{}", args.host, args.port);
    let docs_url = args
        .docs_url
        .unwrap_or_else(|| format!("http://{}/v1", bind));

    let api_service = OpenApiService::new(
        routes::ImageApi::new(controller),
        "Image Host API",
        env!("CARGO_PKG_VERSION"),
    )
    .description(
        "Stores original images and serves them resized on demand.\n\
         Every generated size is persisted and reused by later requests.",
    )
    .server(docs_url);

    let ui = api_service.redoc();
    let spec = api_service.spec();

    let app = Route::new()
        .nest("/v1", api_service)
        .nest("/docs", ui)
        .at("/spec", poem::endpoint::make_sync(move |_| spec.clone()));

    let grace = Duration::from_secs(cfg.background.shutdown_grace_secs);
    info!("Image host listening @ http://{}", bind);

    Server::new(TcpListener::bind(bind))
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown requested, draining in flight requests");
            },
            Some(grace),
        )
        .await?;

    if !background.drain(grace).await {
        warn!(
            "Abandoning {} background jobs still pending after {:?}",
            background.pending(),
            grace,
        );
    }

    Ok(())
}
