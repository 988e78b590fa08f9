//! Component F: the loop enumerator.
//!
//! A best-first bounded search over a prepared [`RoadGraph`], producing a
//! lazy stream of distinct, length-bounded loops rooted at a start node.
//! Ground truth: `loop_generator.py::find_paths_turns_dist`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use shared::CENTROID_DEGREE_METERS;

use crate::bitset::BigBitSet;
use crate::geometry::{uniform_samples, Pt};
use crate::graph_store::RoadGraph;

/// Diversity mode for the acceptance filter (spec.md §4.F, filter 4).
#[derive(Debug, Clone, Copy)]
pub enum Dedup {
    Centroid { min_dist_m: f64 },
    Jaccard { similarity_ceiling: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct EnumParams {
    pub max_path_length_m: f64,
    pub min_path_length_m: f64,
    pub min_loop_length_m: f64,
    pub loop_ratio_floor: f64,
    pub dedup: Dedup,
    pub num_paths: usize,
    pub iteration_cap: usize,
}

impl Default for EnumParams {
    fn default() -> Self {
        Self {
            max_path_length_m: 50.0 * shared::METERS_PER_MILE,
            min_path_length_m: 2.0 * shared::METERS_PER_MILE,
            min_loop_length_m: 600.0,
            loop_ratio_floor: 0.5,
            dedup: Dedup::Centroid { min_dist_m: 50.0 },
            num_paths: 50,
            iteration_cap: 500_000,
        }
    }
}

/// A single accepted loop: a node sequence forming a closed round trip
/// starting and ending at the search root, plus its summary metrics.
#[derive(Debug, Clone)]
pub struct LoopCandidate {
    pub nodes: Vec<u32>,
    pub mask: BigBitSet,
    pub turns: u32,
    pub total_dist_m: f64,
    pub loop_dist_m: f64,
    pub loop_ratio: f64,
    pub centroid: (f64, f64),
}

/// `{ id, prev, cumulative_distance_m }` chain (spec.md §3). Shared ownership
/// via `Rc`: a predecessor is freed once no frontier entry retains it.
struct PathNode {
    node: u32,
    prev: Option<Rc<PathNode>>,
    dist_m: f64,
    turns: u32,
    /// Canonical name of the edge used to arrive at `node`; `None` only at
    /// the search root, where there is no previous edge to compare against.
    incoming_name: Option<crate::graph_store::EdgeName>,
}

struct FrontierEntry {
    path: Rc<PathNode>,
    mask: BigBitSet,
}

fn millimeters(dist_m: f64) -> i64 {
    (dist_m * 1000.0).round() as i64
}

impl FrontierEntry {
    fn cost(&self) -> (u32, i64, u32) {
        (self.path.turns, millimeters(self.path.dist_m), self.path.node)
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost() == other.cost()
    }
}
impl Eq for FrontierEntry {}
impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the lowest cost first.
        other.cost().cmp(&self.cost())
    }
}

/// Walks from `path` to the root, returning the node sequence in `s..c`
/// order and the index within it of the ancestor pointer-equal to `marker`.
fn reconstruct_with_marker(path: &Rc<PathNode>, marker: &Rc<PathNode>) -> (Vec<u32>, usize) {
    let mut stack = Vec::new();
    let mut cur = Some(path.clone());
    while let Some(p) = cur {
        cur = p.prev.clone();
        stack.push(p);
    }
    stack.reverse();
    let marker_idx = stack.iter().position(|p| Rc::ptr_eq(p, marker)).expect("marker must be an ancestor");
    (stack.iter().map(|p| p.node).collect(), marker_idx)
}

fn degree_distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dlat, dlng) = (a.0 - b.0, a.1 - b.1);
    (dlat * dlat + dlng * dlng).sqrt() * CENTROID_DEGREE_METERS
}

/// Bounded best-first loop search. Implements `Iterator` so a consumer can
/// stop pulling at any time without the enumerator doing work beyond one
/// route ahead of consumption.
pub struct LoopEnumerator<'g> {
    graph: &'g RoadGraph,
    adjacency: HashMap<u32, Vec<(u32, usize)>>,
    heap: std::collections::BinaryHeap<FrontierEntry>,
    params: EnumParams,
    pops: usize,
    emitted: usize,
    accepted_masks: HashSet<BigBitSet>,
    accepted_masks_list: Vec<BigBitSet>,
    accepted_centroids: Vec<(f64, f64)>,
}

impl<'g> LoopEnumerator<'g> {
    pub fn new(graph: &'g RoadGraph, start: u32, params: EnumParams) -> Self {
        let adjacency = graph.adjacency();
        let root = Rc::new(PathNode {
            node: start,
            prev: None,
            dist_m: 0.0,
            turns: 0,
            incoming_name: None,
        });
        let mut heap = std::collections::BinaryHeap::new();
        heap.push(FrontierEntry { path: root, mask: BigBitSet::new() });
        Self {
            graph,
            adjacency,
            heap,
            params,
            pops: 0,
            emitted: 0,
            accepted_masks: HashSet::new(),
            accepted_masks_list: Vec::new(),
            accepted_centroids: Vec::new(),
        }
    }

    fn compute_centroid(&self, nodes: &[u32]) -> (f64, f64) {
        let polyline = self.graph.polyline_for_path(nodes);
        let samples = uniform_samples(&polyline, 50.0);
        if samples.is_empty() {
            return polyline.first().map(|p| (p.lat, p.lng)).unwrap_or((0.0, 0.0));
        }
        let (mut lat, mut lng) = (0.0, 0.0);
        for s in &samples {
            lat += s.lat;
            lng += s.lng;
        }
        (lat / samples.len() as f64, lng / samples.len() as f64)
    }

    /// Evaluates the acceptance filters (spec.md §4.F) for an entry whose
    /// node was already visited. Returns `None` on the first failing filter.
    fn try_accept(&mut self, entry: &FrontierEntry) -> Option<LoopCandidate> {
        let c = entry.path.node;
        let mut cur = entry.path.prev.clone();
        let mut loop_start = None;
        while let Some(p) = cur {
            if p.node == c {
                loop_start = Some(p);
                break;
            }
            cur = p.prev.clone();
        }
        let loop_start = loop_start?;

        let (chain, l_idx) = reconstruct_with_marker(&entry.path, &loop_start);
        let loop_dist = entry.path.dist_m - loop_start.dist_m;
        let total_dist = entry.path.dist_m + loop_start.dist_m;

        // Filter 1: minimum loop length.
        if loop_dist < self.params.min_loop_length_m {
            return None;
        }
        // Filter 2: loop ratio floor.
        let loop_ratio = if total_dist > 0.0 { loop_dist / total_dist } else { 0.0 };
        if loop_ratio < self.params.loop_ratio_floor {
            return None;
        }
        // Filter 3: visited-mask uniqueness (exact equality, per spec.md §9
        // Open Question resolution).
        let mask = entry.mask.clone();
        if self.accepted_masks.contains(&mask) {
            return None;
        }

        let mut full_route = chain.clone();
        full_route.extend(chain[..l_idx].iter().rev().copied());
        let centroid = self.compute_centroid(&full_route);

        // Filter 4: diversity.
        match self.params.dedup {
            Dedup::Centroid { min_dist_m } => {
                if self.accepted_centroids.iter().any(|&prev| degree_distance_m(centroid, prev) < min_dist_m) {
                    return None;
                }
            }
            Dedup::Jaccard { similarity_ceiling } => {
                if self.accepted_masks_list.iter().any(|prev| mask.jaccard_similarity(prev) > similarity_ceiling) {
                    return None;
                }
            }
        }

        self.accepted_masks.insert(mask.clone());
        self.accepted_masks_list.push(mask.clone());
        self.accepted_centroids.push(centroid);

        Some(LoopCandidate {
            nodes: full_route,
            mask,
            turns: entry.path.turns,
            total_dist_m: total_dist,
            loop_dist_m: loop_dist,
            loop_ratio,
            centroid,
        })
    }
}

impl<'g> Iterator for LoopEnumerator<'g> {
    type Item = LoopCandidate;

    fn next(&mut self) -> Option<LoopCandidate> {
        if self.emitted >= self.params.num_paths {
            return None;
        }
        while self.pops < self.params.iteration_cap {
            let Some(entry) = self.heap.pop() else { return None };
            self.pops += 1;

            if entry.path.dist_m > self.params.max_path_length_m {
                continue;
            }

            let c = entry.path.node;
            let already_visited = entry.mask.test(c);

            if already_visited {
                if entry.path.dist_m >= self.params.min_path_length_m {
                    if let Some(candidate) = self.try_accept(&entry) {
                        self.emitted += 1;
                        return Some(candidate);
                    }
                }
                continue;
            }

            let mut mask = entry.mask.clone();
            mask.set(c);

            let empty = Vec::new();
            for &(neighbor, edge_idx) in self.adjacency.get(&c).unwrap_or(&empty) {
                if let Some(prev) = &entry.path.prev {
                    if prev.node == neighbor {
                        continue; // immediate backtrack forbidden
                    }
                }
                let edge = &self.graph.edges[edge_idx];
                let turn_increment = match &entry.path.incoming_name {
                    Some(prev_name) => u32::from(!prev_name.shares_with(&edge.name)),
                    None => 0,
                };
                let child = Rc::new(PathNode {
                    node: neighbor,
                    prev: Some(entry.path.clone()),
                    dist_m: entry.path.dist_m + edge.length_m,
                    turns: entry.path.turns + turn_increment,
                    incoming_name: Some(edge.name.clone()),
                });
                self.heap.push(FrontierEntry { path: child, mask: mask.clone() });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{Edge, EdgeName, Node};

    fn node(id: u32, lat: f64, lng: f64) -> Node {
        Node { id, lat, lng, elevation_m: Some(0.0) }
    }

    fn edge(from: u32, to: u32, len: f64) -> Edge {
        Edge { from, to, length_m: len, geometry: None, name: EdgeName::None, highway: None, osmid: None }
    }

    /// S1: a 5x5 unit grid. Expect the four unit squares incident to (0,0)
    /// among the first results, each with loop_ratio == 1.0 (since L == s).
    fn grid_5x5() -> RoadGraph {
        let unit = 0.001;
        let mut nodes = Vec::new();
        for r in 0..5 {
            for c in 0..5 {
                nodes.push(node((r * 5 + c) as u32, r as f64 * unit, c as f64 * unit));
            }
        }
        let id = |r: i32, c: i32| (r * 5 + c) as u32;
        let mut edges = Vec::new();
        for r in 0..5 {
            for c in 0..5 {
                if c + 1 < 5 {
                    edges.push(edge(id(r, c), id(r, c + 1), 100.0));
                    edges.push(edge(id(r, c + 1), id(r, c), 100.0));
                }
                if r + 1 < 5 {
                    edges.push(edge(id(r, c), id(r + 1, c), 100.0));
                    edges.push(edge(id(r + 1, c), id(r, c), 100.0));
                }
            }
        }
        RoadGraph { nodes, edges }
    }

    #[test]
    fn grid_emits_unit_squares_first() {
        let graph = grid_5x5();
        let params = EnumParams {
            max_path_length_m: 1500.0,
            min_path_length_m: 300.0,
            min_loop_length_m: 300.0,
            loop_ratio_floor: 0.3,
            dedup: Dedup::Centroid { min_dist_m: 0.0 },
            num_paths: 10,
            iteration_cap: 500_000,
        };
        let results: Vec<_> = LoopEnumerator::new(&graph, 0, params).collect();
        assert!(!results.is_empty());
        let first = &results[0];
        assert!((first.loop_dist_m - 400.0).abs() < 1.0);
        assert!((first.loop_ratio - 1.0).abs() < 1e-6);
    }

    #[test]
    fn emitted_routes_are_monotonic_in_cost() {
        let graph = grid_5x5();
        let params = EnumParams {
            max_path_length_m: 2000.0,
            min_path_length_m: 300.0,
            min_loop_length_m: 300.0,
            loop_ratio_floor: 0.3,
            dedup: Dedup::Centroid { min_dist_m: 0.0 },
            num_paths: 20,
            iteration_cap: 500_000,
        };
        let results: Vec<_> = LoopEnumerator::new(&graph, 0, params).collect();
        for w in results.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            assert!((a.turns, millimeters(a.total_dist_m)) <= (b.turns, millimeters(b.total_dist_m)));
        }
    }

    #[test]
    fn min_dist_filter_limits_emitted_loops() {
        let graph = grid_5x5();
        let loose = EnumParams {
            max_path_length_m: 1200.0,
            min_path_length_m: 300.0,
            min_loop_length_m: 300.0,
            loop_ratio_floor: 0.3,
            dedup: Dedup::Centroid { min_dist_m: 0.0 },
            num_paths: 10,
            iteration_cap: 500_000,
        };
        let strict = EnumParams {
            dedup: Dedup::Centroid { min_dist_m: 10.0 * 0.001 * shared::DEGREE_METERS },
            ..loose
        };
        let loose_count = LoopEnumerator::new(&graph, 0, loose).count();
        let strict_count = LoopEnumerator::new(&graph, 0, strict).count();
        assert!(strict_count <= loose_count);
        assert!(strict_count <= 1);
    }
}
