//! Component D: network ingest.
//!
//! Downloads are out of scope (spec §1) — this module consumes a local OSM
//! PBF extract and filters it to a [`BoundaryDescriptor`], generalizing the
//! teacher's `graph.rs` two/three-pass `osmpbf` collection strategy (bbox
//! only) to box, polygon, and circle boundaries with a runtime tag filter.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use osmpbf::{Element, ElementReader};
use rayon::prelude::*;
use shared::BoundaryDescriptor;
use thiserror::Error;

use crate::geometry::{circle_polygon, polygon_contains, Pt};
use crate::graph_store::{Edge, EdgeName, Node, RoadGraph};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read OSM pbf at {path}: {source}")]
    Pbf {
        #[source]
        source: osmpbf::Error,
        path: String,
    },
    #[error("no roads found within the requested boundary")]
    EmptyGraph,
}

/// Default filter used when a `CREATE_GRAPH` request omits one.
pub const DEFAULT_FILTER: &str = r#"["highway"~"trunk|primary|secondary|tertiary"]"#;

/// Parses an OSM tag-predicate string of the shape
/// `["highway"~"a|b|c"]` into the set of accepted `highway` values.
pub fn parse_highway_filter(filter: &str) -> HashSet<String> {
    if let Some(start) = filter.find("~\"") {
        let rest = &filter[start + 2..];
        if let Some(end) = rest.find('"') {
            return rest[..end].split('|').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }
    parse_highway_filter(DEFAULT_FILTER)
}

/// A boundary resolved to a containment test plus a bounding envelope used
/// to prefilter nodes before the precise test.
struct ResolvedBoundary {
    polygon: Option<Vec<Pt>>,
    envelope: (f64, f64, f64, f64), // south, west, north, east
    exclusions: Vec<Vec<Pt>>,
}

fn resolve(boundary: &BoundaryDescriptor) -> ResolvedBoundary {
    match boundary {
        BoundaryDescriptor::Box {
            south,
            west,
            north,
            east,
            exclusion_zones,
        } => ResolvedBoundary {
            polygon: None,
            envelope: (*south, *west, *north, *east),
            exclusions: exclusion_zones.iter().map(|zone| zone.iter().map(|&(lat, lng)| Pt::new(lat, lng)).collect()).collect(),
        },
        BoundaryDescriptor::Polygon { coordinates, exclusion_zones } => {
            let poly: Vec<Pt> = coordinates.iter().map(|&(lat, lng)| Pt::new(lat, lng)).collect();
            let envelope = envelope_of(&poly);
            ResolvedBoundary {
                polygon: Some(poly),
                envelope,
                exclusions: exclusion_zones.iter().map(|zone| zone.iter().map(|&(lat, lng)| Pt::new(lat, lng)).collect()).collect(),
            }
        }
        BoundaryDescriptor::Circle { center, radius_miles, exclusion_zones } => {
            let (lat, lng) = *center;
            let poly = circle_polygon(Pt::new(lat, lng), *radius_miles);
            let envelope = envelope_of(&poly);
            ResolvedBoundary {
                polygon: Some(poly),
                envelope,
                exclusions: exclusion_zones.iter().map(|zone| zone.iter().map(|&(lat, lng)| Pt::new(lat, lng)).collect()).collect(),
            }
        }
    }
}

fn envelope_of(poly: &[Pt]) -> (f64, f64, f64, f64) {
    let south = poly.iter().map(|p| p.lat).fold(f64::INFINITY, f64::min);
    let north = poly.iter().map(|p| p.lat).fold(f64::NEG_INFINITY, f64::max);
    let west = poly.iter().map(|p| p.lng).fold(f64::INFINITY, f64::min);
    let east = poly.iter().map(|p| p.lng).fold(f64::NEG_INFINITY, f64::max);
    (south, west, north, east)
}

impl ResolvedBoundary {
    fn contains(&self, pt: Pt) -> bool {
        let (south, west, north, east) = self.envelope;
        if pt.lat < south || pt.lat > north || pt.lng < west || pt.lng > east {
            return false;
        }
        match &self.polygon {
            None => true,
            Some(poly) => polygon_contains(poly, pt),
        }
    }

    fn excluded(&self, pt: Pt) -> bool {
        self.exclusions.iter().any(|zone| polygon_contains(zone, pt))
    }
}

/// Raw OSM node captured during the first ingest pass.
#[derive(Clone, Copy)]
struct RawNode {
    lat: f64,
    lng: f64,
}

/// Downloads (reads, locally) the road network inside `boundary`, filtered
/// by `filter`, and returns a raw (unprepared) [`RoadGraph`] suitable for
/// the preparation pipeline (Component E).
pub fn ingest(pbf_path: &Path, boundary: &BoundaryDescriptor, filter: &str) -> Result<RoadGraph, IngestError> {
    let resolved = resolve(boundary);
    let accepted_highways = parse_highway_filter(filter);

    // Pass 1: collect every node's coordinates (needed for both membership
    // tests and edge geometry regardless of which ways reference them).
    let reader = ElementReader::from_path(pbf_path).map_err(|source| IngestError::Pbf {
        source,
        path: pbf_path.display().to_string(),
    })?;
    let raw_nodes: HashMap<i64, RawNode> = reader
        .par_map_reduce(
            |element| {
                let mut map = HashMap::new();
                match element {
                    Element::Node(n) => {
                        map.insert(n.id(), RawNode { lat: n.lat(), lng: n.lon() });
                    }
                    Element::DenseNode(n) => {
                        map.insert(n.id(), RawNode { lat: n.lat(), lng: n.lon() });
                    }
                    _ => {}
                }
                map
            },
            HashMap::new,
            |mut a, b| {
                a.extend(b);
                a
            },
        )
        .map_err(|source| IngestError::Pbf {
            source,
            path: pbf_path.display().to_string(),
        })?;

    // Pass 2: ways that touch the boundary (any referenced node inside),
    // keeping every node id they reference for connectivity, matching the
    // teacher's rationale in `graph.rs::collect_nodes`.
    let reader = ElementReader::from_path(pbf_path).map_err(|source| IngestError::Pbf {
        source,
        path: pbf_path.display().to_string(),
    })?;
    let ways: Vec<(Vec<i64>, Option<String>, Option<String>, Option<i64>)> = reader
        .par_map_reduce(
            |element| {
                let mut out = Vec::new();
                if let Element::Way(way) = element {
                    let tags: HashMap<String, String> = way.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                    let Some(highway) = tags.get("highway") else {
                        return out;
                    };
                    if !accepted_highways.is_empty() && !accepted_highways.contains(highway) {
                        return out;
                    }
                    let refs: Vec<i64> = way.refs().collect();
                    let touches = refs.iter().any(|id| {
                        raw_nodes
                            .get(id)
                            .map(|n| resolved.contains(Pt::new(n.lat, n.lng)) && !resolved.excluded(Pt::new(n.lat, n.lng)))
                            .unwrap_or(false)
                    });
                    if touches {
                        out.push((refs, tags.get("name").cloned(), tags.get("ref").cloned(), Some(way.id())));
                    }
                }
                out
            },
            Vec::new,
            |mut a, mut b| {
                a.append(&mut b);
                a
            },
        )
        .map_err(|source| IngestError::Pbf {
            source,
            path: pbf_path.display().to_string(),
        })?;

    if ways.is_empty() {
        return Err(IngestError::EmptyGraph);
    }

    // Assign contiguous graph ids (1-indexed, matching the teacher's
    // convention) to every node referenced by a touching way.
    let mut osm_to_graph_id: HashMap<i64, u32> = HashMap::new();
    let mut nodes: Vec<Node> = Vec::new();
    for (refs, _, _, _) in &ways {
        for &osm_id in refs {
            if osm_to_graph_id.contains_key(&osm_id) {
                continue;
            }
            let Some(raw) = raw_nodes.get(&osm_id) else { continue };
            let graph_id = nodes.len() as u32;
            osm_to_graph_id.insert(osm_id, graph_id);
            nodes.push(Node {
                id: graph_id,
                lat: raw.lat,
                lng: raw.lng,
                elevation_m: None,
            });
        }
    }

    let edges_mutex = Mutex::new(Vec::new());
    ways.par_iter().for_each(|(refs, name, r#ref, osmid)| {
        let mut local = Vec::new();
        for pair in refs.windows(2) {
            let (Some(&from), Some(&to)) = (osm_to_graph_id.get(&pair[0]), osm_to_graph_id.get(&pair[1])) else {
                continue;
            };
            let a = &nodes[from as usize];
            let b = &nodes[to as usize];
            let length_m = crate::geometry::geodesic_distance_m(Pt::new(a.lat, a.lng), Pt::new(b.lat, b.lng));
            let geometry = Some(vec![(a.lng, a.lat), (b.lng, b.lat)]);
            let edge_name = EdgeName::from_parts(name.as_deref(), r#ref.as_deref());
            local.push(Edge {
                from,
                to,
                length_m,
                geometry: geometry.clone(),
                name: edge_name.clone(),
                highway: None,
                osmid: *osmid,
            });
            local.push(Edge {
                from: to,
                to: from,
                length_m,
                geometry: Some(vec![(b.lng, b.lat), (a.lng, a.lat)]),
                name: edge_name,
                highway: None,
                osmid: *osmid,
            });
        }
        if !local.is_empty() {
            edges_mutex.lock().unwrap().extend(local);
        }
    });

    let edges = edges_mutex.into_inner().unwrap();
    if edges.is_empty() {
        return Err(IngestError::EmptyGraph);
    }
    Ok(RoadGraph { nodes, edges })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_filter() {
        let set = parse_highway_filter(DEFAULT_FILTER);
        assert!(set.contains("trunk"));
        assert!(set.contains("tertiary"));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn falls_back_on_malformed_filter() {
        let set = parse_highway_filter("not a real filter");
        assert!(set.contains("primary"));
    }
}
