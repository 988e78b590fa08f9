//! Component H: the session dispatcher.
//!
//! Stateful, one session per connected client; maps incoming commands to
//! the graph store, preparation pipeline, loop enumerator, and annotator.
//! Ground truth: `server.py`. No internal failure is allowed to unwind a
//! session task (spec.md §7): [`Dispatcher::handle`] turns every `Err` into
//! a logged warning and keeps the session alive.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use shared::{BoundaryDescriptor, ClientMessage, CreateGraphRequest, MarkerPosition, ServerMessage, StartGenerationRequest};

use crate::annotate::annotate;
use crate::bitset::BigBitSet;
use crate::elevation::ElevationOracle;
use crate::error::DispatchError;
use crate::geometry::{geodesic_distance_m, nearest_vertex_distance_m, polygon_contains, Pt};
use crate::graph_store::{ActiveGraph, GraphStore, RoadGraph};
use crate::ingest;
use crate::loops::{Dedup, EnumParams, LoopEnumerator};
use crate::prepare;

/// Buffer radius for `GET_NODES_NEAR_POLYLINE`, the literal constant from
/// the teacher's `get_edges_near_polyline(coordinates, buffer_meters=25.0)`.
const NEAR_POLYLINE_BUFFER_M: f64 = 25.0;
/// `min_loop_length` is hardcoded at the `START_GENERATION` call site, not
/// taken from the wire, exactly as `server.py::handle_start_generation`.
const START_GENERATION_MIN_LOOP_LENGTH_M: f64 = 600.0;
const ITERATION_CAP: usize = 500_000;

pub struct Dispatcher {
    store: GraphStore,
    oracle: Arc<dyn ElevationOracle>,
    pbf_path: Option<PathBuf>,
    min_component_length_m: f64,
    active: Option<ActiveGraph>,
    enumeration_active: bool,
}

impl Dispatcher {
    pub fn new(store: GraphStore, oracle: Arc<dyn ElevationOracle>, pbf_path: Option<PathBuf>, min_component_length_m: f64) -> Self {
        Self {
            store,
            oracle,
            pbf_path,
            min_component_length_m,
            active: None,
            enumeration_active: false,
        }
    }

    /// Sent immediately on connect, per `server.py::send_graphs_list`.
    pub async fn send_initial_graphs_list(&self, out: &Sender<ServerMessage>) {
        if let Err(e) = self.list_graphs(out).await {
            tracing::warn!(error = %e, "failed to send initial graphs list");
        }
    }

    /// Decodes and dispatches one message. Never propagates: every error is
    /// logged and the session continues (spec.md §7's explicit requirement
    /// that one failed message never ends the session).
    pub async fn handle_text(&mut self, text: &str, out: &Sender<ServerMessage>) {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode client message");
                return;
            }
        };
        if let Err(e) = self.dispatch(msg, out).await {
            tracing::warn!(error = %e, "dispatcher error handling message");
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage, out: &Sender<ServerMessage>) -> Result<(), DispatchError> {
        match msg {
            ClientMessage::ListGraphs => self.list_graphs(out).await,
            ClientMessage::SwitchGraph { name } => self.switch_graph(name, out).await,
            ClientMessage::CreateGraph(req) => self.create_graph(req, out).await,
            ClientMessage::GetNodesInRegion { coordinates } => self.nodes_in_region(coordinates, out).await,
            ClientMessage::GetNodesNearPolyline { coordinates } => self.nodes_near_polyline(coordinates, out).await,
            ClientMessage::StartGeneration(req) => self.start_generation(req, out).await,
        }
    }

    async fn list_graphs(&self, out: &Sender<ServerMessage>) -> Result<(), DispatchError> {
        let graphs = self.store.list()?;
        let boundaries = self.store.list_boundaries()?;
        let active = self.active.as_ref().map(|a| a.name.clone());
        let _ = out.send(ServerMessage::GraphsList { graphs, active, boundaries }).await;
        Ok(())
    }

    async fn switch_graph(&mut self, name: String, out: &Sender<ServerMessage>) -> Result<(), DispatchError> {
        if self.enumeration_active {
            // The source reuses GRAPH_CREATE_ERROR for switch failures too;
            // we keep that exact, slightly surprising, reuse for wire parity.
            let _ = out
                .send(ServerMessage::GraphCreateError {
                    error: "cannot switch graphs while an enumeration is active".into(),
                })
                .await;
            return Ok(());
        }
        match self.load_active(&name) {
            Ok(()) => {
                let _ = out.send(ServerMessage::GraphSwitched { name }).await;
                Ok(())
            }
            Err(e) => {
                let _ = out.send(ServerMessage::GraphCreateError { error: e.to_string() }).await;
                Ok(())
            }
        }
    }

    fn load_active(&mut self, name: &str) -> Result<(), DispatchError> {
        let boundary = self.store.load_boundary(name)?;
        let graph = self.store.load(name, self.oracle.as_ref())?;
        self.active = Some(ActiveGraph { name: name.to_string(), boundary, graph });
        Ok(())
    }

    async fn create_graph(&mut self, req: CreateGraphRequest, out: &Sender<ServerMessage>) -> Result<(), DispatchError> {
        let _ = out.send(ServerMessage::GraphCreating { name: req.name.clone() }).await;

        let boundary = match resolve_boundary(&req) {
            Ok(b) => b,
            Err(error) => {
                let _ = out.send(ServerMessage::GraphCreateError { error }).await;
                return Ok(());
            }
        };
        let Some(pbf_path) = self.pbf_path.clone() else {
            let _ = out
                .send(ServerMessage::GraphCreateError { error: "no OSM source configured for this server".into() })
                .await;
            return Ok(());
        };

        let filter = req.filter.clone().unwrap_or_else(|| ingest::DEFAULT_FILTER.to_string());
        let oracle = self.oracle.clone();
        let min_component_length_m = self.min_component_length_m;
        let boundary_for_task = boundary.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<RoadGraph, DispatchError> {
            let raw = ingest::ingest(&pbf_path, &boundary_for_task, &filter)?;
            let exclusions = exclusion_zones(&boundary_for_task);
            let (prepared, missing) = prepare::run(raw, &exclusions, min_component_length_m, oracle.as_ref())?;
            tracing::info!(missing, nodes = prepared.nodes.len(), edges = prepared.edges.len(), "prepared graph");
            Ok(prepared)
        })
        .await
        .map_err(|e| DispatchError::InvalidInput(format!("graph preparation task panicked: {e}")))?;

        let prepared = match result {
            Ok(g) => g,
            Err(e) => {
                let _ = out.send(ServerMessage::GraphCreateError { error: e.to_string() }).await;
                return Ok(());
            }
        };

        if let Err(e) = self.store.save(&req.name, &prepared, &boundary) {
            let _ = out.send(ServerMessage::GraphCreateError { error: e.to_string() }).await;
            return Ok(());
        }
        self.active = Some(ActiveGraph {
            name: req.name.clone(),
            boundary,
            graph: prepared,
        });

        let _ = out.send(ServerMessage::GraphCreated { name: req.name }).await;
        self.list_graphs(out).await
    }

    async fn nodes_in_region(&self, coordinates: Vec<(f64, f64)>, out: &Sender<ServerMessage>) -> Result<(), DispatchError> {
        let active = self.active.as_ref().ok_or(DispatchError::NoActiveGraph)?;
        let poly: Vec<Pt> = coordinates.into_iter().map(|(lat, lng)| Pt::new(lat, lng)).collect();
        let mut mask = BigBitSet::new();
        for n in &active.graph.nodes {
            if polygon_contains(&poly, Pt::new(n.lat, n.lng)) {
                mask.set(n.id);
            }
        }
        let _ = out.send(ServerMessage::NodesInRegion { mask: mask.to_hex() }).await;
        Ok(())
    }

    async fn nodes_near_polyline(&self, coordinates: Vec<(f64, f64)>, out: &Sender<ServerMessage>) -> Result<(), DispatchError> {
        let active = self.active.as_ref().ok_or(DispatchError::NoActiveGraph)?;
        let polyline: Vec<Pt> = coordinates.into_iter().map(|(lat, lng)| Pt::new(lat, lng)).collect();

        let mut mask = BigBitSet::new();
        for n in &active.graph.nodes {
            if nearest_vertex_distance_m(Pt::new(n.lat, n.lng), &polyline) <= NEAR_POLYLINE_BUFFER_M {
                mask.set(n.id);
            }
        }

        let mut features = Vec::new();
        for e in &active.graph.edges {
            if !mask.test(e.from) || !mask.test(e.to) {
                continue;
            }
            let geom: Vec<(f64, f64)> = e.geometry.clone().unwrap_or_else(|| match (active.graph.node(e.from), active.graph.node(e.to)) {
                (Some(a), Some(b)) => vec![(a.lng, a.lat), (b.lng, b.lat)],
                _ => Vec::new(),
            });
            if geom.is_empty() {
                continue;
            }
            features.push(json!({
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": geom.iter().map(|&(lng, lat)| vec![lng, lat]).collect::<Vec<_>>() },
                "properties": {},
            }));
        }
        let edges = if features.is_empty() {
            None
        } else {
            Some(json!({ "type": "FeatureCollection", "features": features }))
        };

        let _ = out.send(ServerMessage::NodesAlongPath { mask: mask.to_hex(), edges }).await;
        Ok(())
    }

    async fn start_generation(&mut self, req: StartGenerationRequest, out: &Sender<ServerMessage>) -> Result<(), DispatchError> {
        if self.enumeration_active {
            return Err(DispatchError::EnumerationActive);
        }
        let active = self.active.as_ref().ok_or(DispatchError::NoActiveGraph)?;
        let start_node =
            nearest_node(&active.graph, req.lat, req.lng).ok_or_else(|| DispatchError::InvalidInput("active graph has no nodes".into()))?;
        let marker = active
            .graph
            .node(start_node)
            .map(|n| MarkerPosition { lat: n.lat, lng: n.lng })
            .unwrap_or(MarkerPosition { lat: req.lat, lng: req.lng });

        let path_set_id = Uuid::new_v4().to_string();
        let _ = out
            .send(ServerMessage::PathsetCreated {
                path_set_id: path_set_id.clone(),
                marker_position: marker,
            })
            .await;

        let params = EnumParams {
            max_path_length_m: req.max_path_len * shared::METERS_PER_MILE,
            min_path_length_m: req.min_path_len * shared::METERS_PER_MILE,
            min_loop_length_m: START_GENERATION_MIN_LOOP_LENGTH_M,
            loop_ratio_floor: req.loop_ratio,
            dedup: match req.deduplication.as_str() {
                "jaccard" => Dedup::Jaccard { similarity_ceiling: req.sim_ceiling },
                _ => Dedup::Centroid { min_dist_m: req.min_dist_m },
            },
            num_paths: req.num_paths,
            iteration_cap: ITERATION_CAP,
        };
        // `algorithm` is accepted for wire compatibility and logged, never
        // matched: the source's `find_paths` dispatcher ignores it too.
        tracing::debug!(algorithm = %req.algorithm, node = start_node, "starting loop enumeration");

        let graph = active.graph.clone();
        let oracle = self.oracle.clone();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<serde_json::Value>(1);

        self.enumeration_active = true;
        let worker = tokio::task::spawn_blocking(move || {
            for candidate in LoopEnumerator::new(&graph, start_node, params) {
                let annotated = annotate(&graph, &candidate, oracle.as_ref());
                if tx.blocking_send(annotated.geojson).is_err() {
                    break; // receiver dropped: outbound channel closed, stop the search
                }
            }
        });

        while let Some(path) = rx.recv().await {
            let sent = out
                .send(ServerMessage::PathReceived {
                    path_set_id: path_set_id.clone(),
                    path,
                })
                .await;
            if sent.is_err() {
                break; // client disconnected: cancellation is best-effort
            }
            tokio::task::yield_now().await;
        }
        let _ = worker.await;
        self.enumeration_active = false;

        let _ = out.send(ServerMessage::GenerationComplete { path_set_id }).await;
        Ok(())
    }
}

fn nearest_node(graph: &RoadGraph, lat: f64, lng: f64) -> Option<u32> {
    let target = Pt::new(lat, lng);
    graph
        .nodes
        .iter()
        .min_by(|a, b| {
            let da = geodesic_distance_m(target, Pt::new(a.lat, a.lng));
            let db = geodesic_distance_m(target, Pt::new(b.lat, b.lng));
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|n| n.id)
}

fn resolve_boundary(req: &CreateGraphRequest) -> Result<BoundaryDescriptor, String> {
    match req.boundary_type.as_str() {
        "box" => {
            let (Some(south), Some(west), Some(north), Some(east)) = (req.south, req.west, req.north, req.east) else {
                return Err("box boundary requires south/west/north/east".into());
            };
            Ok(BoundaryDescriptor::Box { south, west, north, east, exclusion_zones: vec![] })
        }
        "polygon" => {
            let coordinates = req.coordinates.clone().ok_or("polygon boundary requires coordinates")?;
            if coordinates.len() < 3 {
                return Err("polygon boundary requires at least 3 vertices".into());
            }
            Ok(BoundaryDescriptor::Polygon { coordinates, exclusion_zones: vec![] })
        }
        "circle" => {
            let (Some(center_lat), Some(center_lng), Some(radius_miles)) = (req.center_lat, req.center_lng, req.radius_miles) else {
                return Err("circle boundary requires center_lat/center_lng/radius_miles".into());
            };
            if radius_miles <= 0.0 {
                return Err("circle radius must be positive".into());
            }
            Ok(BoundaryDescriptor::Circle {
                center: (center_lat, center_lng),
                radius_miles,
                exclusion_zones: vec![],
            })
        }
        other => Err(format!("unknown boundary_type: {other}")),
    }
}

fn exclusion_zones(boundary: &BoundaryDescriptor) -> Vec<Vec<Pt>> {
    let zones = match boundary {
        BoundaryDescriptor::Box { exclusion_zones, .. } => exclusion_zones,
        BoundaryDescriptor::Polygon { exclusion_zones, .. } => exclusion_zones,
        BoundaryDescriptor::Circle { exclusion_zones, .. } => exclusion_zones,
    };
    zones.iter().map(|zone| zone.iter().map(|&(lat, lng)| Pt::new(lat, lng)).collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::ConstantElevationOracle;

    #[test]
    fn resolve_box_boundary() {
        let req = CreateGraphRequest {
            name: "test".into(),
            boundary_type: "box".into(),
            filter: None,
            south: Some(1.0),
            west: Some(2.0),
            north: Some(3.0),
            east: Some(4.0),
            coordinates: None,
            center_lat: None,
            center_lng: None,
            radius_miles: None,
        };
        let boundary = resolve_boundary(&req).unwrap();
        assert!(matches!(boundary, BoundaryDescriptor::Box { .. }));
    }

    #[test]
    fn resolve_circle_rejects_nonpositive_radius() {
        let req = CreateGraphRequest {
            name: "test".into(),
            boundary_type: "circle".into(),
            filter: None,
            south: None,
            west: None,
            north: None,
            east: None,
            coordinates: None,
            center_lat: Some(0.0),
            center_lng: Some(0.0),
            radius_miles: Some(0.0),
        };
        assert!(resolve_boundary(&req).is_err());
    }

    #[tokio::test]
    async fn start_generation_without_active_graph_logs_and_survives() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(GraphStore::new(dir.path()), Arc::new(ConstantElevationOracle(0.0)), None, 3000.0);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        dispatcher
            .handle_text(r#"{"type":"START_GENERATION","lat":0.0,"lng":0.0}"#, &tx)
            .await;
        // No panic, no crash: the session is still usable afterward.
        dispatcher.handle_text(r#"{"type":"LIST_GRAPHS"}"#, &tx).await;
    }
}
