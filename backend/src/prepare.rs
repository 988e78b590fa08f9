//! Component E: the graph preparation pipeline.
//!
//! Ten sequential, individually idempotent stages turning a raw ingested
//! [`RoadGraph`] into a topologically clean routing graph. Ground truth:
//! `graph_manager.py::_process_graph` plus the `generate_graph*` wrapper
//! order (exclusions -> name cleanup -> process -> relabel -> elevation
//! attach -> persist).
//!
//! Stage 2 (edge-name cleanup) and stage 3 (attribute stripping) are enforced
//! structurally rather than as separate passes here: [`crate::ingest`] already
//! derives the canonical [`crate::graph_store::EdgeName`] at construction
//! time, and [`crate::graph_store::Edge`] has no fields beyond the stage-3
//! whitelist to begin with.

use std::collections::{HashMap, HashSet};

use petgraph::graphmap::UnGraphMap;
use thiserror::Error;

use crate::biconnected;
use crate::elevation::ElevationOracle;
use crate::geometry::Pt;
use crate::graph_store::{Edge, Node, RoadGraph};

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("graph is empty after applying exclusion zones")]
    EmptyAfterExclusion,
}

const MERGE_RADIUS_M: f64 = 15.0;
pub const DEFAULT_MIN_COMPONENT_LENGTH_M: f64 = 3000.0;

/// Runs all ten stages, returning the prepared graph plus the count of nodes
/// whose elevation reading was missing (stage 10).
pub fn run(
    mut graph: RoadGraph,
    exclusion_zones: &[Vec<Pt>],
    min_component_length: f64,
    oracle: &dyn ElevationOracle,
) -> Result<(RoadGraph, usize), PrepareError> {
    graph = apply_exclusions(graph, exclusion_zones);
    if graph.nodes.is_empty() {
        return Err(PrepareError::EmptyAfterExclusion);
    }

    graph = prune_biconnected(graph, min_component_length);
    graph = consolidate_intersections(graph, MERGE_RADIUS_M);
    graph = reduce_parallel_edges(graph);
    graph = merge_degree_two(graph);
    graph = final_cleanup(graph);
    graph = relabel(graph);
    let missing = attach_elevation(&mut graph, oracle);

    Ok((graph, missing))
}

/// Stage 1: remove every node strictly inside any exclusion polygon, and the
/// edges that were incident to it.
fn apply_exclusions(graph: RoadGraph, exclusion_zones: &[Vec<Pt>]) -> RoadGraph {
    if exclusion_zones.is_empty() {
        return graph;
    }
    let removed: HashSet<u32> = graph
        .nodes
        .iter()
        .filter(|n| {
            let pt = Pt::new(n.lat, n.lng);
            exclusion_zones.iter().any(|zone| crate::geometry::polygon_contains(zone, pt))
        })
        .map(|n| n.id)
        .collect();
    if removed.is_empty() {
        return graph;
    }
    let nodes = graph.nodes.into_iter().filter(|n| !removed.contains(&n.id)).collect();
    let edges = graph
        .edges
        .into_iter()
        .filter(|e| !removed.contains(&e.from) && !removed.contains(&e.to))
        .collect();
    RoadGraph { nodes, edges }
}

/// Stage 4: keep only nodes inside the union of "large" biconnected blocks
/// and the articulation vertices connecting them. If no large block exists
/// anywhere, the stage is skipped (a warning is logged) rather than
/// producing an empty graph, per spec.md's failure semantics.
fn prune_biconnected(graph: RoadGraph, min_component_length: f64) -> RoadGraph {
    match biconnected::prune(&graph, min_component_length) {
        Some(keep) => {
            let nodes: Vec<Node> = graph.nodes.into_iter().filter(|n| keep.contains(&n.id)).collect();
            let edges: Vec<Edge> = graph.edges.into_iter().filter(|e| keep.contains(&e.from) && keep.contains(&e.to)).collect();
            RoadGraph { nodes, edges }
        }
        None => {
            tracing::warn!("biconnected pruning found no block meeting the length threshold; skipping stage 4");
            graph
        }
    }
}

/// Stage 5: merge intersections whose positions (in a local meter-based
/// tangent-plane projection centered on the graph's centroid) lie within
/// `radius_m` of each other.
fn consolidate_intersections(graph: RoadGraph, radius_m: f64) -> RoadGraph {
    if graph.nodes.is_empty() {
        return graph;
    }
    let centroid_lat = graph.nodes.iter().map(|n| n.lat).sum::<f64>() / graph.nodes.len() as f64;
    let lng_scale = centroid_lat.to_radians().cos().max(1e-6);

    // Equirectangular projection onto a local meter plane, consistent with
    // the degree-approximation path documented in geometry.rs.
    let project = |n: &Node| -> (f64, f64) {
        let x = n.lng * shared::DEGREE_METERS * lng_scale;
        let y = n.lat * shared::DEGREE_METERS;
        (x, y)
    };

    let positions: Vec<(f64, f64)> = graph.nodes.iter().map(project).collect();
    let cell = radius_m;
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, &(x, y)) in positions.iter().enumerate() {
        grid.entry(((x / cell).floor() as i64, (y / cell).floor() as i64)).or_default().push(i);
    }

    // Union-find over node indices.
    let mut parent: Vec<usize> = (0..positions.len()).collect();
    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }
    fn union(parent: &mut [usize], a: usize, b: usize) {
        let (ra, rb) = (find(parent, a), find(parent, b));
        if ra != rb {
            parent[ra] = rb;
        }
    }

    for (i, &(x, y)) in positions.iter().enumerate() {
        let (cx, cy) = ((x / cell).floor() as i64, (y / cell).floor() as i64);
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(bucket) = grid.get(&(cx + dx, cy + dy)) else { continue };
                for &j in bucket {
                    if j <= i {
                        continue;
                    }
                    let (ox, oy) = positions[j];
                    let dist = ((x - ox).powi(2) + (y - oy).powi(2)).sqrt();
                    if dist <= radius_m {
                        union(&mut parent, i, j);
                    }
                }
            }
        }
    }

    // Build super-nodes: one per root, positioned at the arithmetic mean of
    // its cluster's WGS84 coordinates.
    let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..positions.len() {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(i);
    }

    let mut old_to_new: HashMap<u32, u32> = HashMap::new();
    let mut nodes = Vec::with_capacity(clusters.len());
    for (new_id, (_, members)) in clusters.into_iter().enumerate() {
        let new_id = new_id as u32;
        let lat = members.iter().map(|&i| graph.nodes[i].lat).sum::<f64>() / members.len() as f64;
        let lng = members.iter().map(|&i| graph.nodes[i].lng).sum::<f64>() / members.len() as f64;
        let elevation_m = graph.nodes[members[0]].elevation_m;
        for &i in &members {
            old_to_new.insert(graph.nodes[i].id, new_id);
        }
        nodes.push(Node {
            id: new_id,
            lat,
            lng,
            elevation_m,
        });
    }

    let edges: Vec<Edge> = graph
        .edges
        .into_iter()
        .filter_map(|mut e| {
            let from = *old_to_new.get(&e.from)?;
            let to = *old_to_new.get(&e.to)?;
            if from == to {
                return None;
            }
            e.from = from;
            e.to = to;
            Some(e)
        })
        .collect();

    RoadGraph { nodes, edges }
}

/// Stage 6: at most one directed edge per ordered `(u, v)`, keeping the one
/// with minimum length.
fn reduce_parallel_edges(graph: RoadGraph) -> RoadGraph {
    let mut best: HashMap<(u32, u32), Edge> = HashMap::new();
    for e in graph.edges {
        let key = (e.from, e.to);
        match best.get(&key) {
            Some(existing) if existing.length_m <= e.length_m => {}
            _ => {
                best.insert(key, e);
            }
        }
    }
    RoadGraph {
        nodes: graph.nodes,
        edges: best.into_values().collect(),
    }
}

fn node_coords(nodes: &[Node]) -> HashMap<u32, Pt> {
    nodes.iter().map(|n| (n.id, Pt::new(n.lat, n.lng))).collect()
}

fn straight_geometry(a: Pt, b: Pt) -> Vec<(f64, f64)> {
    vec![a.to_lnglat(), b.to_lnglat()]
}

/// Splices edge geometry `a -> n -> b` into a single `a -> b` polyline,
/// synthesizing a straight segment for any leg missing explicit geometry.
fn splice_geometry(a: Pt, n: Pt, b: Pt, first: &Option<Vec<(f64, f64)>>, second: &Option<Vec<(f64, f64)>>) -> Vec<(f64, f64)> {
    let mut g1 = first.clone().unwrap_or_else(|| straight_geometry(a, n));
    let mut g2 = second.clone().unwrap_or_else(|| straight_geometry(n, b));
    // The shared vertex `n` sits at the end of g1 and the start of g2; drop one copy.
    if let (Some(last), Some(first2)) = (g1.last().copied(), g2.first().copied()) {
        if (last.0 - first2.0).abs() < 1e-9 && (last.1 - first2.1).abs() < 1e-9 {
            g2.remove(0);
        }
    }
    g1.append(&mut g2);
    g1
}

/// Stage 7: repeatedly splice away degree-2 interior nodes until a full pass
/// removes none. Ground truth: `_remove_node_and_merge`/`_simplify_graph_topology`.
fn merge_degree_two(mut graph: RoadGraph) -> RoadGraph {
    loop {
        let coords = node_coords(&graph.nodes);
        let mut undirected: HashMap<u32, HashSet<u32>> = HashMap::new();
        for e in &graph.edges {
            if e.from != e.to {
                undirected.entry(e.from).or_default().insert(e.to);
                undirected.entry(e.to).or_default().insert(e.from);
            }
        }

        let mut candidate: Option<(u32, u32, u32)> = None;
        for n in &graph.nodes {
            let neighbors = undirected.get(&n.id);
            if let Some(set) = neighbors {
                if set.len() == 2 {
                    let mut it = set.iter().copied();
                    let (u, v) = (it.next().unwrap(), it.next().unwrap());
                    candidate = Some((n.id, u, v));
                    break;
                }
            }
        }

        let Some((n, u, v)) = candidate else { break };

        let edge_index = |from: u32, to: u32| graph.edges.iter().position(|e| e.from == from && e.to == to);

        let (Some(&n_pt), Some(&u_pt), Some(&v_pt)) = (coords.get(&n), coords.get(&u), coords.get(&v)) else {
            // Geometry inconsistency: drop the node without splicing.
            graph.nodes.retain(|nd| nd.id != n);
            graph.edges.retain(|e| e.from != n && e.to != n);
            continue;
        };

        let mut spliced_any = false;
        let mut new_edges = Vec::new();

        if let (Some(i1), Some(i2)) = (edge_index(u, n), edge_index(n, v)) {
            let e1 = graph.edges[i1].clone();
            let e2 = graph.edges[i2].clone();
            new_edges.push(Edge {
                from: u,
                to: v,
                length_m: e1.length_m + e2.length_m,
                geometry: Some(splice_geometry(u_pt, n_pt, v_pt, &e1.geometry, &e2.geometry)),
                name: e1.name.clone(),
                highway: e1.highway.clone().or(e2.highway.clone()),
                osmid: e1.osmid.or(e2.osmid),
            });
            spliced_any = true;
        }
        if let (Some(i1), Some(i2)) = (edge_index(v, n), edge_index(n, u)) {
            let e1 = graph.edges[i1].clone();
            let e2 = graph.edges[i2].clone();
            new_edges.push(Edge {
                from: v,
                to: u,
                length_m: e1.length_m + e2.length_m,
                geometry: Some(splice_geometry(v_pt, n_pt, u_pt, &e1.geometry, &e2.geometry)),
                name: e1.name.clone(),
                highway: e1.highway.clone().or(e2.highway.clone()),
                osmid: e1.osmid.or(e2.osmid),
            });
            spliced_any = true;
        }

        graph.edges.retain(|e| e.from != n && e.to != n);
        graph.nodes.retain(|nd| nd.id != n);
        if spliced_any {
            graph.edges.extend(new_edges);
        }
    }
    graph
}

/// Stage 8: remove self-loops and isolated nodes.
fn final_cleanup(graph: RoadGraph) -> RoadGraph {
    let edges: Vec<Edge> = graph.edges.into_iter().filter(|e| e.from != e.to).collect();
    let mut g: UnGraphMap<u32, ()> = UnGraphMap::new();
    for n in &graph.nodes {
        g.add_node(n.id);
    }
    for e in &edges {
        g.add_edge(e.from, e.to, ());
    }
    let nodes = graph.nodes.into_iter().filter(|n| g.neighbors(n.id).count() > 0).collect();
    RoadGraph { nodes, edges }
}

/// Stage 9: remap node identifiers to `0..N-1`, ascending by the identifier
/// each node carried after stage 8 (a stable, deterministic order).
fn relabel(graph: RoadGraph) -> RoadGraph {
    let mut ordered = graph.nodes;
    ordered.sort_by_key(|n| n.id);
    let mut remap: HashMap<u32, u32> = HashMap::new();
    let nodes: Vec<Node> = ordered
        .into_iter()
        .enumerate()
        .map(|(new_id, mut n)| {
            remap.insert(n.id, new_id as u32);
            n.id = new_id as u32;
            n
        })
        .collect();
    let edges = graph
        .edges
        .into_iter()
        .map(|mut e| {
            e.from = remap[&e.from];
            e.to = remap[&e.to];
            e
        })
        .collect();
    RoadGraph { nodes, edges }
}

/// Stage 10: attach elevation to every node, defaulting misses to 0 while
/// returning a miss count for logging.
fn attach_elevation(graph: &mut RoadGraph, oracle: &dyn ElevationOracle) -> usize {
    let mut missing = 0;
    for n in graph.nodes.iter_mut() {
        match oracle.elevation(n.lat, n.lng) {
            Some(e) => n.elevation_m = Some(e),
            None => {
                n.elevation_m = Some(0.0);
                missing += 1;
            }
        }
    }
    if missing > 0 {
        tracing::warn!(missing, total = graph.nodes.len(), "elevation oracle missed some nodes");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::ConstantElevationOracle;
    use crate::graph_store::EdgeName;

    fn node(id: u32, lat: f64, lng: f64) -> Node {
        Node { id, lat, lng, elevation_m: None }
    }

    fn edge(from: u32, to: u32, len: f64) -> Edge {
        Edge { from, to, length_m: len, geometry: None, name: EdgeName::None, highway: None, osmid: None }
    }

    /// 5x5 grid preparation should be idempotent: running it twice changes
    /// nothing beyond relabeling (spec.md testable property 7).
    fn grid_graph(n: usize) -> RoadGraph {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let unit = 0.001;
        for r in 0..n {
            for c in 0..n {
                nodes.push(node((r * n + c) as u32, r as f64 * unit, c as f64 * unit));
            }
        }
        let id = |r: usize, c: usize| (r * n + c) as u32;
        for r in 0..n {
            for c in 0..n {
                if c + 1 < n {
                    edges.push(edge(id(r, c), id(r, c + 1), 100.0));
                    edges.push(edge(id(r, c + 1), id(r, c), 100.0));
                }
                if r + 1 < n {
                    edges.push(edge(id(r, c), id(r + 1, c), 100.0));
                    edges.push(edge(id(r + 1, c), id(r, c), 100.0));
                }
            }
        }
        RoadGraph { nodes, edges }
    }

    #[test]
    fn no_degree_two_nodes_survive_preparation() {
        let graph = grid_graph(5);
        let oracle = ConstantElevationOracle(0.0);
        let (prepared, _) = run(graph, &[], 300.0, &oracle).unwrap();
        let undirected = biconnected_degree(&prepared);
        for n in &prepared.nodes {
            assert_ne!(undirected.get(&n.id).copied().unwrap_or(0), 2, "node {} has degree 2", n.id);
        }
    }

    #[test]
    fn ids_are_contiguous_after_preparation() {
        let graph = grid_graph(4);
        let oracle = ConstantElevationOracle(0.0);
        let (prepared, _) = run(graph, &[], 300.0, &oracle).unwrap();
        let mut ids: Vec<u32> = prepared.nodes.iter().map(|n| n.id).collect();
        ids.sort();
        let expected: Vec<u32> = (0..ids.len() as u32).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn empty_after_exclusion_is_an_error() {
        let graph = grid_graph(2);
        let exclusion = vec![vec![Pt::new(-1.0, -1.0), Pt::new(-1.0, 1.0), Pt::new(1.0, 1.0), Pt::new(1.0, -1.0)]];
        let oracle = ConstantElevationOracle(0.0);
        let err = run(graph, &exclusion, 300.0, &oracle).unwrap_err();
        assert!(matches!(err, PrepareError::EmptyAfterExclusion));
    }

    fn biconnected_degree(graph: &RoadGraph) -> HashMap<u32, usize> {
        let mut undirected: HashMap<u32, HashSet<u32>> = HashMap::new();
        for e in &graph.edges {
            if e.from != e.to {
                undirected.entry(e.from).or_default().insert(e.to);
                undirected.entry(e.to).or_default().insert(e.from);
            }
        }
        undirected.into_iter().map(|(k, v)| (k, v.len())).collect()
    }
}
