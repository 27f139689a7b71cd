//! Trust Server Binary
//!
//! Loads configuration, opens storage and serves the matchmaking API.

use clap::Parser;
use std::path::PathBuf;
use trust::api::ApiServer;
use trust::config::{ConfigLoader, StorageBackend};
use trust::services::ServiceContainer;

#[derive(Parser, Debug)]
#[command(name = "trust")]
#[command(about = "Share/steal matchmaking server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Database directory
    #[arg(long)]
    db_path: Option<String>,

    /// Storage backend: memory or rocksdb
    #[arg(long)]
    backend: Option<String>,

    /// Allowed CORS origins (comma-separated, use * for all)
    #[arg(long)]
    cors_origins: Option<String>,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trust=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    if let Some(backend) = args.backend {
        config.storage.backend = match backend.as_str() {
            "memory" => StorageBackend::Memory,
            "rocksdb" => StorageBackend::RocksDb,
            other => return Err(format!("unknown backend '{}', expected memory or rocksdb", other).into()),
        };
    }
    if let Some(origins) = args.cors_origins {
        config.server.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
    }
    loader.validate(&config)?;

    if let Some(path) = args.write_config {
        loader.save(&config, &path.to_string_lossy())?;
        tracing::info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    let services = ServiceContainer::new(config)?;
    ApiServer::new(services).run().await
}
