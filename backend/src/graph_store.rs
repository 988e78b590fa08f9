//! Component C: the prepared-graph data model, persistence, and the
//! process-wide "active graph" handle.
//!
//! Persistence format: `postcard`-encoded [`RoadGraph`], `zstd`-compressed,
//! written atomically (write to a `.tmp` sibling, then rename) plus a
//! sidecar JSON boundary descriptor, following the same dual-file layout the
//! teacher's `GraphFile::write_to_path` uses for its JSON cache.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shared::BoundaryDescriptor;
use thiserror::Error;

use crate::elevation::ElevationOracle;
use crate::geometry::Pt;

/// Canonical edge name: a proper tagged variant, never a union of
/// heterogeneous types (Design Notes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeName {
    None,
    Single(String),
    Set(BTreeSet<String>),
}

impl EdgeName {
    /// Turn detection: "the two names share at least one element; `none`
    /// never shares."
    pub fn shares_with(&self, other: &EdgeName) -> bool {
        match (self, other) {
            (EdgeName::None, _) | (_, EdgeName::None) => false,
            (EdgeName::Single(a), EdgeName::Single(b)) => a == b,
            (EdgeName::Single(a), EdgeName::Set(set)) | (EdgeName::Set(set), EdgeName::Single(a)) => set.contains(a),
            (EdgeName::Set(a), EdgeName::Set(b)) => a.intersection(b).next().is_some(),
        }
    }

    pub fn from_parts(name: Option<&str>, r#ref: Option<&str>) -> EdgeName {
        if let Some(n) = name {
            return EdgeName::Single(n.to_string());
        }
        if let Some(r) = r#ref {
            let parts: BTreeSet<String> = r.split(';').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            return match parts.len() {
                0 => EdgeName::None,
                1 => EdgeName::Single(parts.into_iter().next().unwrap()),
                _ => EdgeName::Set(parts),
            };
        }
        EdgeName::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub lat: f64,
    pub lng: f64,
    pub elevation_m: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
    pub length_m: f64,
    /// Ordered `(lng, lat)` vertices; `None` means a straight segment.
    pub geometry: Option<Vec<(f64, f64)>>,
    pub name: EdgeName,
    pub highway: Option<String>,
    pub osmid: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoadGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl RoadGraph {
    /// Adjacency list of `(neighbor, edge_index)` pairs, directed.
    pub fn adjacency(&self) -> HashMap<u32, Vec<(u32, usize)>> {
        let mut adj: HashMap<u32, Vec<(u32, usize)>> = HashMap::new();
        for (idx, e) in self.edges.iter().enumerate() {
            adj.entry(e.from).or_default().push((e.to, idx));
        }
        adj
    }

    pub fn node(&self, id: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn needs_elevation(&self) -> bool {
        self.nodes.iter().any(|n| n.elevation_m.is_none())
    }

    pub fn edge_between(&self, from: u32, to: u32) -> Option<&Edge> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }

    /// Concatenates the directed edge geometries along `nodes` into a single
    /// `(lat, lng)` polyline, falling back to a straight segment between
    /// endpoints when an edge carries no explicit geometry (spec.md §3).
    pub fn polyline_for_path(&self, nodes: &[u32]) -> Vec<Pt> {
        let mut out: Vec<Pt> = Vec::new();
        for w in nodes.windows(2) {
            let (a, b) = (w[0], w[1]);
            let seg: Vec<Pt> = match self.edge_between(a, b).and_then(|e| e.geometry.as_ref()) {
                Some(geom) => geom.iter().map(|&p| Pt::from_lnglat(p)).collect(),
                None => match (self.node(a), self.node(b)) {
                    (Some(na), Some(nb)) => vec![Pt::new(na.lat, na.lng), Pt::new(nb.lat, nb.lng)],
                    _ => continue,
                },
            };
            if out.last().copied() == seg.first().copied() {
                out.extend(seg.into_iter().skip(1));
            } else {
                out.extend(seg);
            }
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum GraphStoreError {
    #[error("i/o error at {path:?}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to decode graph blob: {0}")]
    Decode(#[from] postcard::Error),
    #[error("failed to decode boundary sidecar: {0}")]
    BoundaryDecode(#[from] serde_json::Error),
    #[error("no such graph: {0}")]
    NotFound(String),
    #[error("zstd compression error: {0}")]
    Zstd(std::io::Error),
}

const FORMAT_VERSION: u8 = 1;

fn blob_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.graph"))
}

fn boundary_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.boundary.json"))
}

/// `list`, `load`, `save`, `list_boundaries` per spec §4.C.
pub struct GraphStore {
    pub dir: PathBuf,
}

impl GraphStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn list(&self) -> Result<Vec<String>, GraphStoreError> {
        let mut names = Vec::new();
        if !self.dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.dir).map_err(|source| GraphStoreError::Io {
            source,
            path: self.dir.clone(),
        })? {
            let entry = entry.map_err(|source| GraphStoreError::Io {
                source,
                path: self.dir.clone(),
            })?;
            if let Some(stem) = entry.path().file_name().and_then(|f| f.to_str()).and_then(|f| f.strip_suffix(".graph")) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn list_boundaries(&self) -> Result<HashMap<String, BoundaryDescriptor>, GraphStoreError> {
        let mut out = HashMap::new();
        for name in self.list()? {
            if let Ok(b) = self.load_boundary(&name) {
                out.insert(name, b);
            }
        }
        Ok(out)
    }

    pub fn load_boundary(&self, name: &str) -> Result<BoundaryDescriptor, GraphStoreError> {
        let path = boundary_path(&self.dir, name);
        let data = fs::read(&path).map_err(|source| GraphStoreError::Io { source, path: path.clone() })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Loads a graph, migrating (backfilling elevation and rewriting the
    /// blob) if the stored graph predates elevation attachment.
    pub fn load(&self, name: &str, oracle: &dyn ElevationOracle) -> Result<RoadGraph, GraphStoreError> {
        let path = blob_path(&self.dir, name);
        if !path.exists() {
            return Err(GraphStoreError::NotFound(name.to_string()));
        }
        let raw = fs::read(&path).map_err(|source| GraphStoreError::Io { source, path: path.clone() })?;
        if raw.is_empty() || raw[0] != FORMAT_VERSION {
            return Err(GraphStoreError::NotFound(name.to_string()));
        }
        let decompressed = zstd::stream::decode_all(&raw[1..]).map_err(GraphStoreError::Zstd)?;
        let mut graph: RoadGraph = postcard::from_bytes(&decompressed)?;

        if graph.needs_elevation() {
            let mut missing = 0usize;
            for node in graph.nodes.iter_mut() {
                if node.elevation_m.is_none() {
                    match oracle.elevation(node.lat, node.lng) {
                        Some(e) => node.elevation_m = Some(e),
                        None => {
                            node.elevation_m = Some(0.0);
                            missing += 1;
                        }
                    }
                }
            }
            tracing::warn!(missing, graph = name, "migrated graph: backfilled elevation");
            self.save_graph(name, &graph)?;
        }
        Ok(graph)
    }

    pub fn save(&self, name: &str, graph: &RoadGraph, boundary: &BoundaryDescriptor) -> Result<(), GraphStoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| GraphStoreError::Io {
            source,
            path: self.dir.clone(),
        })?;
        self.save_graph(name, graph)?;
        let bpath = boundary_path(&self.dir, name);
        let json = serde_json::to_vec_pretty(boundary)?;
        fs::write(&bpath, json).map_err(|source| GraphStoreError::Io { source, path: bpath })?;
        Ok(())
    }

    fn save_graph(&self, name: &str, graph: &RoadGraph) -> Result<(), GraphStoreError> {
        let path = blob_path(&self.dir, name);
        let tmp_path = path.with_extension("graph.tmp");
        let encoded = postcard::to_allocvec(graph)?;
        let compressed = zstd::stream::encode_all(&encoded[..], 3).map_err(GraphStoreError::Zstd)?;
        let mut blob = Vec::with_capacity(compressed.len() + 1);
        blob.push(FORMAT_VERSION);
        blob.extend_from_slice(&compressed);
        fs::write(&tmp_path, &blob).map_err(|source| GraphStoreError::Io {
            source,
            path: tmp_path.clone(),
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| GraphStoreError::Io { source, path })?;
        Ok(())
    }
}

/// The single active graph held by a dispatcher session. Not a global:
/// an owned handle per spec.md §9's redesign instruction.
pub struct ActiveGraph {
    pub name: String,
    pub boundary: BoundaryDescriptor,
    pub graph: RoadGraph,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::ConstantElevationOracle;

    #[test]
    fn edge_name_turn_detection() {
        let none = EdgeName::None;
        let main = EdgeName::Single("Main St".to_string());
        assert!(!none.shares_with(&main));
        assert!(main.shares_with(&EdgeName::Single("Main St".to_string())));
        assert!(!main.shares_with(&EdgeName::Single("Oak St".to_string())));
    }

    #[test]
    fn edge_name_from_ref_splits_on_semicolon() {
        let n = EdgeName::from_parts(None, Some("US 1;SR 5"));
        match n {
            EdgeName::Set(set) => {
                assert!(set.contains("US 1"));
                assert!(set.contains("SR 5"));
            }
            other => panic!("expected set, got {other:?}"),
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::new(dir.path());
        let graph = RoadGraph {
            nodes: vec![Node {
                id: 0,
                lat: 1.0,
                lng: 2.0,
                elevation_m: Some(10.0),
            }],
            edges: vec![],
        };
        let boundary = BoundaryDescriptor::Box {
            south: 0.0,
            west: 0.0,
            north: 1.0,
            east: 1.0,
            exclusion_zones: vec![],
        };
        store.save("test", &graph, &boundary).unwrap();
        let oracle = ConstantElevationOracle(0.0);
        let loaded = store.load("test", &oracle).unwrap();
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.nodes[0].elevation_m, Some(10.0));
    }

    #[test]
    fn load_migrates_missing_elevation() {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::new(dir.path());
        let graph = RoadGraph {
            nodes: vec![Node {
                id: 0,
                lat: 1.0,
                lng: 2.0,
                elevation_m: None,
            }],
            edges: vec![],
        };
        let boundary = BoundaryDescriptor::Box {
            south: 0.0,
            west: 0.0,
            north: 1.0,
            east: 1.0,
            exclusion_zones: vec![],
        };
        store.save("test", &graph, &boundary).unwrap();
        let oracle = ConstantElevationOracle(42.0);
        let loaded = store.load("test", &oracle).unwrap();
        assert_eq!(loaded.nodes[0].elevation_m, Some(42.0));
        // reload: migration should have persisted, no more missing elevation.
        assert!(!loaded.needs_elevation());
    }
}
