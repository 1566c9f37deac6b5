use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use directory::DirectoryClient;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use webhook::config::Config;
use webhook::queue::InMemoryWorkTable;
use webhook::{SyncEngine, SyncService, api, metrics_defs};

#[derive(Parser)]
#[command(about = "Webhook-driven permission synchronization service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Validation(#[from] webhook::config::ValidationError),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config(&args.config)?;
    metrics_defs::describe_all();

    let directory = DirectoryClient::new(config.directory.base_url.clone());
    let engine = SyncEngine::new(directory);
    let table = Arc::new(InMemoryWorkTable::new());
    let service = Arc::new(SyncService::new(engine, table, &config.webhook));

    let app = api::router(service);
    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "permsync listening");

    axum::serve(listener, app).await?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<Config, StartupError> {
    let raw = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}
