use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A `(lat, lng)` pair as it appears on the wire: a two-element JSON array.
pub type LatLng = (f64, f64);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundaryDescriptor {
    Box {
        south: f64,
        west: f64,
        north: f64,
        east: f64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclusion_zones: Vec<Vec<LatLng>>,
    },
    Polygon {
        coordinates: Vec<LatLng>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclusion_zones: Vec<Vec<LatLng>>,
    },
    Circle {
        center: LatLng,
        radius_miles: f64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclusion_zones: Vec<Vec<LatLng>>,
    },
}

/// Messages a client may send to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "LIST_GRAPHS")]
    ListGraphs,
    #[serde(rename = "SWITCH_GRAPH")]
    SwitchGraph { name: String },
    #[serde(rename = "CREATE_GRAPH")]
    CreateGraph(CreateGraphRequest),
    #[serde(rename = "GET_NODES_IN_REGION")]
    GetNodesInRegion { coordinates: Vec<LatLng> },
    #[serde(rename = "GET_NODES_NEAR_POLYLINE")]
    GetNodesNearPolyline { coordinates: Vec<LatLng> },
    #[serde(rename = "START_GENERATION")]
    StartGeneration(StartGenerationRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGraphRequest {
    pub name: String,
    #[serde(default = "default_boundary_type")]
    pub boundary_type: String,
    pub filter: Option<String>,
    // box
    pub south: Option<f64>,
    pub west: Option<f64>,
    pub north: Option<f64>,
    pub east: Option<f64>,
    // polygon
    pub coordinates: Option<Vec<LatLng>>,
    // circle
    pub center_lat: Option<f64>,
    pub center_lng: Option<f64>,
    pub radius_miles: Option<f64>,
}

fn default_boundary_type() -> String {
    "box".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartGenerationRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_min_path_len_mi")]
    pub min_path_len: f64,
    #[serde(default = "default_max_path_len_mi")]
    pub max_path_len: f64,
    #[serde(default = "default_loop_ratio")]
    pub loop_ratio: f64,
    #[serde(default = "default_sim_ceiling")]
    pub sim_ceiling: f64,
    #[serde(default = "default_num_paths")]
    pub num_paths: usize,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_deduplication")]
    pub deduplication: String,
    #[serde(default = "default_min_dist_m")]
    pub min_dist_m: f64,
}

fn default_min_path_len_mi() -> f64 {
    2.0
}
fn default_max_path_len_mi() -> f64 {
    50.0
}
fn default_loop_ratio() -> f64 {
    0.5
}
fn default_sim_ceiling() -> f64 {
    0.7
}
fn default_num_paths() -> usize {
    50
}
fn default_algorithm() -> String {
    "scenic".to_string()
}
fn default_deduplication() -> String {
    "centroid".to_string()
}
fn default_min_dist_m() -> f64 {
    50.0
}

/// Messages a session may send to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "GRAPHS_LIST")]
    GraphsList {
        graphs: Vec<String>,
        active: Option<String>,
        boundaries: HashMap<String, BoundaryDescriptor>,
    },
    #[serde(rename = "GRAPH_SWITCHED")]
    GraphSwitched { name: String },
    #[serde(rename = "GRAPH_CREATING")]
    GraphCreating { name: String },
    #[serde(rename = "GRAPH_CREATED")]
    GraphCreated { name: String },
    #[serde(rename = "GRAPH_CREATE_ERROR")]
    GraphCreateError { error: String },
    #[serde(rename = "NODES_IN_REGION")]
    NodesInRegion { mask: String },
    #[serde(rename = "NODES_ALONG_PATH")]
    NodesAlongPath {
        mask: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edges: Option<serde_json::Value>,
    },
    #[serde(rename = "PATHSET_CREATED")]
    PathsetCreated {
        #[serde(rename = "pathSetId")]
        path_set_id: String,
        #[serde(rename = "markerPosition")]
        marker_position: MarkerPosition,
    },
    #[serde(rename = "PATH_RECEIVED")]
    PathReceived {
        #[serde(rename = "pathSetId")]
        path_set_id: String,
        path: serde_json::Value,
    },
    #[serde(rename = "GENERATION_COMPLETE")]
    GenerationComplete {
        #[serde(rename = "pathSetId")]
        path_set_id: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarkerPosition {
    pub lat: f64,
    pub lng: f64,
}

pub const METERS_PER_MILE: f64 = 1609.34;
pub const METERS_PER_FOOT: f64 = 0.3048;
pub const DEGREE_METERS: f64 = 111_111.0;
/// Degree-approximation constant used only by the loop enumerator's
/// centroid-diversity filter (spec.md §4.F), distinct from [`DEGREE_METERS`].
pub const CENTROID_DEGREE_METERS: f64 = 111_139.0;
