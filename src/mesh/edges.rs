use std::collections::HashSet;

use petgraph::graphmap::UnGraphMap;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Point, Rect};
use crate::solver::{Solver, SolverState};
use crate::viz::{Line, Scene};

use super::node::{CapacityMesh, NodeId};

/// Unordered adjacency between two finished mesh nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MeshEdge {
    pub nodes: [NodeId; 2],
}

/// Two rects border when they touch along one axis and genuinely overlap
/// along the other; corner contact does not count.
const BORDER_EPSILON: f64 = 1e-3;

#[derive(Clone, Debug)]
struct EdgeCandidate {
    id: NodeId,
    rect: Rect,
    zs: Vec<usize>,
}

impl RTreeObject for EdgeCandidate {
    type Envelope = AABB<Point>;

    fn envelope(&self) -> Self::Envelope {
        self.rect.envelope()
    }
}

/// Derives the adjacency edge list of a capacity mesh, one node per step.
pub struct MeshEdgeBuilder {
    state: SolverState,
    max_iterations: u64,
    entries: Vec<EdgeCandidate>,
    tree: RTree<EdgeCandidate>,
    cursor: usize,
    edges: Vec<MeshEdge>,
    seen: HashSet<(NodeId, NodeId)>,
}

impl MeshEdgeBuilder {
    pub fn new(mesh: &CapacityMesh) -> Self {
        let entries: Vec<EdgeCandidate> = mesh
            .finished_nodes()
            .map(|node| EdgeCandidate {
                id: node.id,
                rect: node.rect,
                zs: node.available_z.clone(),
            })
            .collect();
        let tree = RTree::bulk_load(entries.clone());
        MeshEdgeBuilder {
            state: SolverState::default(),
            max_iterations: entries.len() as u64 + 16,
            entries,
            tree,
            cursor: 0,
            edges: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn build(mesh: &CapacityMesh) -> Vec<MeshEdge> {
        let mut builder = MeshEdgeBuilder::new(mesh);
        builder
            .solve()
            .expect("edge derivation exceeded its iteration budget");
        builder.edges
    }

    pub fn into_edges(self) -> Vec<MeshEdge> {
        assert!(self.state.solved, "edges requested before builder solved");
        self.edges
    }

    fn nodes_border(a: &Rect, b: &Rect) -> bool {
        let dx = (a.center.x - b.center.x).abs();
        let dy = (a.center.y - b.center.y).abs();
        let half_w = (a.width + b.width) / 2.0;
        let half_h = (a.height + b.height) / 2.0;
        (dx <= half_w + BORDER_EPSILON && dy < half_h - BORDER_EPSILON)
            || (dy <= half_h + BORDER_EPSILON && dx < half_w - BORDER_EPSILON)
    }
}

impl Solver for MeshEdgeBuilder {
    fn name(&self) -> &'static str {
        "capacity_edges"
    }

    fn state(&self) -> &SolverState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SolverState {
        &mut self.state
    }

    fn max_iterations(&self) -> u64 {
        self.max_iterations
    }

    fn step_once(&mut self) {
        let Some(entry) = self.entries.get(self.cursor) else {
            tracing::debug!(edges = self.edges.len(), "edge derivation complete");
            self.state.finish();
            return;
        };

        let tl = entry.rect.top_left();
        let br = entry.rect.bottom_right();
        let probe = AABB::from_corners(
            Point::new(tl.x - BORDER_EPSILON, tl.y - BORDER_EPSILON),
            Point::new(br.x + BORDER_EPSILON, br.y + BORDER_EPSILON),
        );

        for other in self.tree.locate_in_envelope_intersecting(&probe) {
            if other.id == entry.id {
                continue;
            }
            if !other.zs.iter().any(|z| entry.zs.contains(z)) {
                continue;
            }
            if !Self::nodes_border(&entry.rect, &other.rect) {
                continue;
            }
            let key = if entry.id < other.id {
                (entry.id, other.id)
            } else {
                (other.id, entry.id)
            };
            if self.seen.insert(key) {
                self.edges.push(MeshEdge {
                    nodes: [key.0, key.1],
                });
            }
        }

        self.cursor += 1;
    }

    fn visualize(&self) -> Scene {
        let mut scene = Scene::titled("capacity mesh edges");
        let centers: std::collections::HashMap<NodeId, Point> = self
            .entries
            .iter()
            .map(|entry| (entry.id, entry.rect.center))
            .collect();
        for edge in &self.edges {
            let (Some(a), Some(b)) = (centers.get(&edge.nodes[0]), centers.get(&edge.nodes[1]))
            else {
                continue;
            };
            scene.lines.push(Line {
                points: vec![*a, *b],
                stroke: Some("rgba(150, 150, 150, 0.2)".to_string()),
                dash: None,
            });
        }
        scene
    }
}

/// Neighbor lookup structure for the pathing solvers.
pub fn adjacency(edges: &[MeshEdge]) -> UnGraphMap<NodeId, ()> {
    let mut graph = UnGraphMap::new();
    for edge in edges {
        graph.add_edge(edge.nodes[0], edge.nodes[1], ());
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::node::MeshNode;

    fn node(id: u32, x: f64, y: f64, size: f64, zs: Vec<usize>) -> MeshNode {
        MeshNode {
            id: NodeId(id),
            rect: Rect::new(Point::new(x, y), size, size),
            available_z: zs,
            depth: 0,
            parent: None,
            contains_obstacle: false,
            completely_inside_obstacle: false,
            contains_target: false,
            target_connection: None,
            assigned_obstacle: None,
        }
    }

    fn mesh_of(nodes: Vec<MeshNode>) -> CapacityMesh {
        let finished = nodes.iter().map(|n| n.id).collect();
        CapacityMesh { nodes, finished }
    }

    #[test]
    fn side_by_side_nodes_share_an_edge() {
        let mesh = mesh_of(vec![
            node(0, 0.0, 0.0, 2.0, vec![0]),
            node(1, 2.0, 0.0, 2.0, vec![0]),
        ]);
        let edges = MeshEdgeBuilder::build(&mesh);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].nodes, [NodeId(0), NodeId(1)]);
    }

    #[test]
    fn corner_contact_is_not_adjacency() {
        let mesh = mesh_of(vec![
            node(0, 0.0, 0.0, 2.0, vec![0]),
            node(1, 2.0, 2.0, 2.0, vec![0]),
        ]);
        assert!(MeshEdgeBuilder::build(&mesh).is_empty());
    }

    #[test]
    fn disjoint_layers_are_not_adjacent() {
        let mesh = mesh_of(vec![
            node(0, 0.0, 0.0, 2.0, vec![0]),
            node(1, 2.0, 0.0, 2.0, vec![1]),
        ]);
        assert!(MeshEdgeBuilder::build(&mesh).is_empty());
    }

    #[test]
    fn multi_layer_node_bridges_layers() {
        let mesh = mesh_of(vec![
            node(0, 0.0, 0.0, 2.0, vec![0]),
            node(1, 2.0, 0.0, 2.0, vec![0, 1]),
            node(2, 4.0, 0.0, 2.0, vec![1]),
        ]);
        let edges = MeshEdgeBuilder::build(&mesh);
        assert_eq!(edges.len(), 2);
        let graph = adjacency(&edges);
        let mut neighbors: Vec<NodeId> = graph.neighbors(NodeId(1)).collect();
        neighbors.sort();
        assert_eq!(neighbors, vec![NodeId(0), NodeId(2)]);
    }

    #[test]
    fn edges_reference_existing_nodes_only() {
        let mesh = mesh_of(vec![
            node(0, 0.0, 0.0, 2.0, vec![0]),
            node(1, 2.0, 0.0, 2.0, vec![0]),
            node(2, 2.0, 2.0, 2.0, vec![0]),
        ]);
        let edges = MeshEdgeBuilder::build(&mesh);
        for edge in &edges {
            assert_ne!(edge.nodes[0], edge.nodes[1]);
            for id in edge.nodes {
                assert!(mesh.finished.contains(&id));
            }
        }
    }
}
