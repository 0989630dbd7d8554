mod capabilities;
mod config;
mod routes;

use std::sync::Arc;

use clap::Parser;
use twms::cache::TileFileCache;
use twms::engine::TileEngine;
use twms::fetcher::Fetcher;
use twms::http_session::HttpSession;
use twms::Compositor;

use crate::config::ServerConfig;
use crate::routes::AppState;

#[derive(Parser, Debug)]
#[command(name = "twms-server")]
#[command(about = "Tile-map proxy and reprojection server", long_about = None)]
struct Cli {
    /// Path to the JSON server configuration.
    #[arg(short, long, default_value = "twms.json")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger from RUST_LOG environment variable.
    // Example: RUST_LOG=debug twms-server --config twms.json
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let file_cache = TileFileCache::new(config.cache_root.clone());
    let layers = config.build_layers()?;
    let session = HttpSession::new()?;

    let mut engine_layers = std::collections::HashMap::with_capacity(layers.len());
    for (id, layer) in &layers {
        let fetcher = Arc::new(Fetcher::new(Arc::clone(layer), file_cache.clone(), session.clone()));
        engine_layers.insert(Arc::clone(id), (Arc::clone(layer), fetcher));
    }
    let engine = Arc::new(TileEngine::with_capacity(engine_layers, config.max_ram_tiles));

    let defaults = config.resolved_defaults();
    let compositor = Compositor::new(engine, layers.clone(), file_cache, defaults.max_height, defaults.max_width);

    let state = Arc::new(AppState { compositor, layers });
    let app = routes::router(state);

    log::info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
