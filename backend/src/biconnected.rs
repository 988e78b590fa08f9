//! Stage 4 of the graph preparation pipeline: biconnected pruning.
//!
//! Ground truth: `graph_manager.py::_prune_graph_biconnected`. petgraph 0.8
//! exposes `articulation_points` and `bridges` but not biconnected component
//! enumeration, so this module hand-rolls Hopcroft's linear-time algorithm
//! (DFS with an edge stack, popped at articulation points) and the
//! block-cut-tree "keep" propagation described in spec.md §4.E stage 4.

use std::collections::{HashMap, HashSet};

use crate::graph_store::RoadGraph;

#[derive(Debug, Clone)]
pub struct Block {
    pub nodes: HashSet<u32>,
    pub edges: Vec<(u32, u32)>,
}

fn canon(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Builds a simple undirected adjacency list from a (possibly multi-edged,
/// directed) [`RoadGraph`].
fn undirected_adjacency(graph: &RoadGraph) -> HashMap<u32, Vec<u32>> {
    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    let mut adj: HashMap<u32, Vec<u32>> = HashMap::new();
    for e in &graph.edges {
        let key = canon(e.from, e.to);
        if e.from == e.to || !seen.insert(key) {
            continue;
        }
        adj.entry(e.from).or_default().push(e.to);
        adj.entry(e.to).or_default().push(e.from);
    }
    for n in &graph.nodes {
        adj.entry(n.id).or_default();
    }
    adj
}

/// Hopcroft's biconnected-components algorithm, iterative to avoid stack
/// depth limits on large graphs. Returns the blocks (each a maximal
/// 2-connected edge set) and the set of articulation vertices.
pub fn biconnected_components(adjacency: &HashMap<u32, Vec<u32>>) -> (Vec<Block>, HashSet<u32>) {
    let mut disc: HashMap<u32, i64> = HashMap::new();
    let mut low: HashMap<u32, i64> = HashMap::new();
    let mut parent: HashMap<u32, u32> = HashMap::new();
    let mut timer: i64 = 0;
    let mut edge_stack: Vec<(u32, u32)> = Vec::new();
    let mut blocks: Vec<Block> = Vec::new();
    let mut articulation: HashSet<u32> = HashSet::new();

    let mut nodes: Vec<u32> = adjacency.keys().copied().collect();
    nodes.sort_unstable();

    for &start in &nodes {
        if disc.contains_key(&start) {
            continue;
        }
        // (node, neighbor index, root_children count ref via parent check)
        let mut stack: Vec<(u32, usize)> = Vec::new();
        disc.insert(start, timer);
        low.insert(start, timer);
        timer += 1;
        stack.push((start, 0));
        let mut root_children: u32 = 0;

        while let Some(&(u, idx)) = stack.last() {
            let neighbors = adjacency.get(&u).cloned().unwrap_or_default();
            if idx < neighbors.len() {
                stack.last_mut().unwrap().1 += 1;
                let v = neighbors[idx];
                if !disc.contains_key(&v) {
                    edge_stack.push((u, v));
                    parent.insert(v, u);
                    disc.insert(v, timer);
                    low.insert(v, timer);
                    timer += 1;
                    if u == start {
                        root_children += 1;
                    }
                    stack.push((v, 0));
                } else if parent.get(&u) != Some(&v) && disc[&v] < disc[&u] {
                    edge_stack.push((u, v));
                    let lu = low[&u].min(disc[&v]);
                    low.insert(u, lu);
                } else if parent.get(&u) == Some(&v) {
                    // Already traversed the tree edge back to parent; nothing to do,
                    // but a true multi-edge back to parent would need separate handling,
                    // which cannot occur since adjacency is a simple-graph projection.
                }
            } else {
                stack.pop();
                if let Some(&(p, _)) = stack.last() {
                    let lu = low[&u];
                    let lp = low[&p].min(lu);
                    low.insert(p, lp);
                    let is_articulation = if p == start {
                        root_children >= 2
                    } else {
                        lu >= disc[&p]
                    };
                    if is_articulation {
                        articulation.insert(p);
                        let mut block_edges = Vec::new();
                        let mut block_nodes = HashSet::new();
                        while let Some(e) = edge_stack.last().copied() {
                            edge_stack.pop();
                            block_nodes.insert(e.0);
                            block_nodes.insert(e.1);
                            block_edges.push(e);
                            if e == (p, u) || e == (u, p) {
                                break;
                            }
                        }
                        if !block_edges.is_empty() {
                            blocks.push(Block {
                                nodes: block_nodes,
                                edges: block_edges,
                            });
                        }
                    }
                }
            }
        }

        // Flush whatever remains on the edge stack belonging to this DFS tree.
        if !edge_stack.is_empty() {
            let mut block_edges = Vec::new();
            let mut block_nodes = HashSet::new();
            while let Some(e) = edge_stack.pop() {
                block_nodes.insert(e.0);
                block_nodes.insert(e.1);
                block_edges.push(e);
            }
            if !block_edges.is_empty() {
                blocks.push(Block {
                    nodes: block_nodes,
                    edges: block_edges,
                });
            }
        }
    }

    (blocks, articulation)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BctNode {
    Block(usize),
    Art(u32),
}

/// Minimum undirected edge length per canonical `(u, v)` pair, used as the
/// per-edge weight when summing a block's total length.
fn min_edge_lengths(graph: &RoadGraph) -> HashMap<(u32, u32), f64> {
    let mut out: HashMap<(u32, u32), f64> = HashMap::new();
    for e in &graph.edges {
        let key = canon(e.from, e.to);
        out.entry(key).and_modify(|l| *l = l.min(e.length_m)).or_insert(e.length_m);
    }
    out
}

fn block_weight(block: &Block, lengths: &HashMap<(u32, u32), f64>) -> f64 {
    let mut seen = HashSet::new();
    let mut total = 0.0;
    for &(a, b) in &block.edges {
        let key = canon(a, b);
        if seen.insert(key) {
            total += lengths.get(&key).copied().unwrap_or(0.0);
        }
    }
    total
}

/// Runs the full stage-4 pruning pass. Returns `None` if no large block was
/// found anywhere (caller should skip pruning and keep the input graph,
/// logging a warning, per spec.md §4.E failure semantics).
pub fn prune(graph: &RoadGraph, min_component_length: f64) -> Option<HashSet<u32>> {
    let adjacency = undirected_adjacency(graph);
    let (blocks, articulation) = biconnected_components(&adjacency);
    let lengths = min_edge_lengths(graph);

    let is_large: Vec<bool> = blocks
        .iter()
        .map(|b| b.nodes.len() >= 3 && block_weight(b, &lengths) >= min_component_length)
        .collect();

    if !is_large.iter().any(|&b| b) {
        return None;
    }

    // Build the block-cut tree as a bipartite adjacency over BctNode.
    let mut bct_adj: HashMap<BctNode, Vec<BctNode>> = HashMap::new();
    for (i, block) in blocks.iter().enumerate() {
        for &n in &block.nodes {
            if articulation.contains(&n) {
                bct_adj.entry(BctNode::Block(i)).or_default().push(BctNode::Art(n));
                bct_adj.entry(BctNode::Art(n)).or_default().push(BctNode::Block(i));
            }
        }
    }
    // Isolated blocks (no articulation vertex) still need a node in the tree.
    for (i, _) in blocks.iter().enumerate() {
        bct_adj.entry(BctNode::Block(i)).or_default();
    }

    // Connected components of the block-cut tree (it is a forest).
    let mut visited: HashSet<BctNode> = HashSet::new();
    let mut components: Vec<Vec<BctNode>> = Vec::new();
    let mut all_tree_nodes: Vec<BctNode> = bct_adj.keys().copied().collect();
    all_tree_nodes.sort_by_key(|n| match n {
        BctNode::Block(i) => (0, *i as u32),
        BctNode::Art(a) => (1, *a),
    });
    for &start in &all_tree_nodes {
        if visited.contains(&start) {
            continue;
        }
        let mut comp = Vec::new();
        let mut stack = vec![start];
        visited.insert(start);
        while let Some(n) = stack.pop() {
            comp.push(n);
            for &nb in bct_adj.get(&n).unwrap_or(&Vec::new()) {
                if visited.insert(nb) {
                    stack.push(nb);
                }
            }
        }
        components.push(comp);
    }

    let mut valid_nodes: HashSet<u32> = HashSet::new();

    for comp in &components {
        let root = comp.iter().find(|n| matches!(n, BctNode::Block(i) if is_large[*i])).copied();
        let Some(root) = root else { continue };

        // Rooted DFS with explicit parent tracking (tree, so no cycles).
        let mut parent_of: HashMap<BctNode, BctNode> = HashMap::new();
        let mut order: Vec<BctNode> = Vec::new();
        let mut stack = vec![root];
        let mut seen_in_comp = HashSet::new();
        seen_in_comp.insert(root);
        while let Some(n) = stack.pop() {
            order.push(n);
            for &nb in bct_adj.get(&n).unwrap_or(&Vec::new()) {
                if seen_in_comp.insert(nb) {
                    parent_of.insert(nb, n);
                    stack.push(nb);
                }
            }
        }

        let mut subtree_has_large: HashMap<BctNode, bool> = HashMap::new();
        for &n in order.iter().rev() {
            let self_large = matches!(n, BctNode::Block(i) if is_large[i]);
            let mut has = self_large;
            for &nb in bct_adj.get(&n).unwrap_or(&Vec::new()) {
                if parent_of.get(&nb) == Some(&n) && *subtree_has_large.get(&nb).unwrap_or(&false) {
                    has = true;
                }
            }
            subtree_has_large.insert(n, has);
        }

        for (&n, &keep) in &subtree_has_large {
            if !keep {
                continue;
            }
            match n {
                BctNode::Block(i) => valid_nodes.extend(blocks[i].nodes.iter().copied()),
                BctNode::Art(a) => {
                    valid_nodes.insert(a);
                }
            }
        }
    }

    if valid_nodes.is_empty() {
        None
    } else {
        Some(valid_nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{Edge, EdgeName, Node};

    fn node(id: u32) -> Node {
        Node { id, lat: 0.0, lng: 0.0, elevation_m: Some(0.0) }
    }

    fn edge(from: u32, to: u32, len: f64) -> Edge {
        Edge { from, to, length_m: len, geometry: None, name: EdgeName::None, highway: None, osmid: None }
    }

    /// A triangle (large, weight 3000 >= 1000 threshold) joined by a bridge
    /// chain to a small 2-node dangling edge: the dangling edge should be
    /// pruned, the triangle retained.
    #[test]
    fn prunes_small_dangling_block_keeps_large_cycle() {
        let nodes = vec![node(0), node(1), node(2), node(3)];
        let edges = vec![
            edge(0, 1, 1000.0),
            edge(1, 0, 1000.0),
            edge(1, 2, 1000.0),
            edge(2, 1, 1000.0),
            edge(2, 0, 1000.0),
            edge(0, 2, 1000.0),
            edge(2, 3, 50.0),
            edge(3, 2, 50.0),
        ];
        let graph = RoadGraph { nodes, edges };
        let kept = prune(&graph, 2000.0).expect("expected a large block");
        assert!(kept.contains(&0));
        assert!(kept.contains(&1));
        assert!(kept.contains(&2));
        assert!(!kept.contains(&3));
    }

    #[test]
    fn no_large_block_returns_none() {
        let nodes = vec![node(0), node(1)];
        let edges = vec![edge(0, 1, 10.0), edge(1, 0, 10.0)];
        let graph = RoadGraph { nodes, edges };
        assert!(prune(&graph, 3000.0).is_none());
    }
}
