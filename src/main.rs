use env_logger::Env;
use log::{error, info};
use plate_scanner::config::Config;
use plate_scanner::models::ModelPaths;
use plate_scanner::paddle::{self, PaddleOcrConfig};
use plate_scanner::server::{self, AppState};
use plate_scanner::SqliteRegistry;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-scanner");

    if let Err(e) = run().await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    info!("Opening registry at {:?}", config.registry_db);
    let registry = SqliteRegistry::open(&config.registry_db)?;

    let paths = ModelPaths::new(&config.model_dir).with_mirror(config.model_mirror.clone());
    if config.model_download {
        paths.ensure_downloaded().await?;
    }
    let engine_config = PaddleOcrConfig {
        intra_threads: config.ocr_threads,
        ..PaddleOcrConfig::default()
    };
    // Load the models before accepting requests.
    let recognizer =
        tokio::task::spawn_blocking(move || paddle::shared_engine(&paths, engine_config)).await??;

    let state = Arc::new(AppState {
        recognizer,
        registry: Arc::new(registry),
        flows: config.flows,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    server::run(addr, state).await;
    Ok(())
}
