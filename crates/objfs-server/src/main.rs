use clap::Parser;
use objfs_core::config::DiskConfig;
use objfs_core::objectlayer::{FsObjectLayer, StorageLayer};
use objfs_server::{router, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "objfs-server", about = "Minimal health/readiness front-end over a mounted object disk")]
struct Cli {
    /// Disk root to mount (overrides OBJFS_ROOT)
    #[arg(long)]
    root: Option<String>,

    /// Path to a TOML config file, applied before OBJFS_* env overrides
    #[arg(long)]
    config: Option<String>,

    /// Address to bind the health/readiness listener to
    #[arg(long, default_value = "127.0.0.1:9000")]
    bind: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => DiskConfig::from_file_and_env(std::path::Path::new(path)).expect("failed to load config file"),
        None => DiskConfig::from_env(),
    };
    if let Some(root) = cli.root {
        config.root = root.into();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    let layer = Arc::new(
        FsObjectLayer::mount(config)
            .await
            .expect("failed to mount disk"),
    );

    let state = Arc::new(AppState {
        layer: layer.clone(),
        start_time: std::time::Instant::now(),
    });

    let app = router::build_router(state);
    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .expect("failed to bind listener");
    tracing::info!(bind = %cli.bind, "objfs-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    layer.shutdown().await.expect("failed to unmount disk cleanly");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    tracing::info!("shutdown signal received");
}
