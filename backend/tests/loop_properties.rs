//! Property-style checks for the loop enumerator's emission ordering
//! (spec.md §8 testable property 3) across randomly sized grid fixtures,
//! cheaper here than enumerating hand-built cases one at a time.

use backend::graph_store::{Edge, EdgeName, Node, RoadGraph};
use backend::loops::{Dedup, EnumParams, LoopEnumerator};
use proptest::prelude::*;

fn grid_graph(n: usize, unit_m: f64) -> RoadGraph {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let step_deg = 0.001;
    for r in 0..n {
        for c in 0..n {
            nodes.push(Node {
                id: (r * n + c) as u32,
                lat: r as f64 * step_deg,
                lng: c as f64 * step_deg,
                elevation_m: Some(0.0),
            });
        }
    }
    let id = |r: usize, c: usize| (r * n + c) as u32;
    for r in 0..n {
        for c in 0..n {
            if c + 1 < n {
                edges.push(Edge { from: id(r, c), to: id(r, c + 1), length_m: unit_m, geometry: None, name: EdgeName::None, highway: None, osmid: None });
                edges.push(Edge { from: id(r, c + 1), to: id(r, c), length_m: unit_m, geometry: None, name: EdgeName::None, highway: None, osmid: None });
            }
            if r + 1 < n {
                edges.push(Edge { from: id(r, c), to: id(r + 1, c), length_m: unit_m, geometry: None, name: EdgeName::None, highway: None, osmid: None });
                edges.push(Edge { from: id(r + 1, c), to: id(r, c), length_m: unit_m, geometry: None, name: EdgeName::None, highway: None, osmid: None });
            }
        }
    }
    RoadGraph { nodes, edges }
}

fn millimeters(dist_m: f64) -> i64 {
    (dist_m * 1000.0).round() as i64
}

proptest! {
    /// Emitted routes must never regress in `(turns, distance)` order,
    /// regardless of grid size or edge length (spec.md §4.F's heap order).
    #[test]
    fn emitted_routes_stay_monotonic_on_random_grids(n in 3usize..7, unit_m in 50.0f64..200.0) {
        let graph = grid_graph(n, unit_m);
        let params = EnumParams {
            max_path_length_m: unit_m * 20.0,
            min_path_length_m: unit_m * 2.0,
            min_loop_length_m: unit_m * 2.0,
            loop_ratio_floor: 0.2,
            dedup: Dedup::Centroid { min_dist_m: 0.0 },
            num_paths: 15,
            iteration_cap: 200_000,
        };
        let results: Vec<_> = LoopEnumerator::new(&graph, 0, params).collect();
        let mut prev: Option<(u32, i64)> = None;
        for r in &results {
            let key = (r.turns, millimeters(r.total_dist_m));
            if let Some(p) = prev {
                prop_assert!(p <= key);
            }
            prev = Some(key);
        }
    }

    /// Every emitted loop must clear both the minimum loop length and the
    /// ratio floor it was generated with (spec.md §8 testable property 4).
    #[test]
    fn emitted_loops_clear_length_and_ratio_floors(n in 3usize..6, unit_m in 50.0f64..150.0) {
        let graph = grid_graph(n, unit_m);
        let ratio_floor = 0.25;
        let min_loop_m = unit_m * 2.0;
        let params = EnumParams {
            max_path_length_m: unit_m * 16.0,
            min_path_length_m: unit_m * 2.0,
            min_loop_length_m: min_loop_m,
            loop_ratio_floor: ratio_floor,
            dedup: Dedup::Centroid { min_dist_m: 0.0 },
            num_paths: 10,
            iteration_cap: 200_000,
        };
        for r in LoopEnumerator::new(&graph, 0, params) {
            prop_assert!(r.loop_dist_m + 1e-6 >= min_loop_m);
            prop_assert!(r.loop_ratio + 1e-9 >= ratio_floor);
        }
    }
}
