//! Offline equivalent of the `CREATE_GRAPH` message: ingest an OSM pbf slice
//! within a box boundary and persist the prepared graph under a graphs
//! directory, without standing up a websocket server. Ground truth: the
//! teacher's `bin/build_graph.rs`, generalized to the new pipeline.

use std::path::PathBuf;

use backend::elevation::{DemElevationOracle, ElevationOracle};
use backend::graph_store::GraphStore;
use backend::ingest;
use backend::prepare::{self, DEFAULT_MIN_COMPONENT_LENGTH_M};
use clap::Parser;
use shared::BoundaryDescriptor;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(author, version, about = "Prepare a scenic loop routing graph from an OSM pbf extract")]
struct Args {
    /// Path to the OSM .pbf file (e.g. a regional extract)
    #[arg(long)]
    pbf: PathBuf,

    /// Directory the graph store keeps its `.graph`/`.boundary.json` files in
    #[arg(long, default_value = "data/graphs")]
    graphs_dir: PathBuf,

    /// Name the prepared graph is saved under
    #[arg(long)]
    name: String,

    #[arg(long)]
    south: f64,
    #[arg(long)]
    west: f64,
    #[arg(long)]
    north: f64,
    #[arg(long)]
    east: f64,

    /// OSM highway-tag filter, e.g. `["highway"~"trunk|primary|secondary|tertiary"]`
    #[arg(long)]
    filter: Option<String>,

    /// Directory of ArcASCII DEM tiles named `<lat>_<lng>.asc`
    #[arg(long)]
    dem_dir: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_MIN_COMPONENT_LENGTH_M)]
    min_component_length_m: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let boundary = BoundaryDescriptor::Box {
        south: args.south,
        west: args.west,
        north: args.north,
        east: args.east,
        exclusion_zones: vec![],
    };
    let filter = args.filter.unwrap_or_else(|| ingest::DEFAULT_FILTER.to_string());

    tracing::info!(pbf = ?args.pbf, name = %args.name, "ingesting");
    let raw = ingest::ingest(&args.pbf, &boundary, &filter)?;
    tracing::info!(nodes = raw.nodes.len(), edges = raw.edges.len(), "raw graph ingested");

    let oracle: Box<dyn ElevationOracle> = match args.dem_dir {
        Some(dir) => Box::new(DemElevationOracle::new(dir)),
        None => Box::new(DemElevationOracle::new("data/dem")),
    };

    let (prepared, missing) = prepare::run(raw, &[], args.min_component_length_m, oracle.as_ref())?;
    tracing::info!(nodes = prepared.nodes.len(), edges = prepared.edges.len(), missing, "graph prepared");

    let store = GraphStore::new(args.graphs_dir);
    store.save(&args.name, &prepared, &boundary)?;
    tracing::info!(name = %args.name, "graph saved");

    Ok(())
}
