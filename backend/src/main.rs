use std::net::SocketAddr;
use std::sync::Arc;

use backend::config::ServerConfig;
use backend::elevation::{DemElevationOracle, ElevationOracle};
use backend::ws::{create_router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "backend=debug,axum::rejection=trace".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("SCENIC_CONFIG").ok().map(std::path::PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref());

    let oracle: Arc<dyn ElevationOracle> = match &config.dem_dir {
        Some(dir) => Arc::new(DemElevationOracle::new(dir.clone())),
        None => {
            tracing::warn!("no dem_dir configured; elevation queries will report missing everywhere");
            Arc::new(DemElevationOracle::new("data/dem"))
        }
    };

    let state = AppState {
        graphs_dir: config.graphs_dir.clone(),
        oracle,
        pbf_path: config.osm_pbf_path.clone(),
        min_component_length_m: config.min_component_length_m,
    };
    let app = create_router(state);

    let addr: SocketAddr = config.bind_addr.parse().expect("valid socket address");
    tracing::info!("starting scenic loop route engine on ws://{addr}/ws");
    axum::serve(tokio::net::TcpListener::bind(addr).await.unwrap(), app).await.unwrap();
}
