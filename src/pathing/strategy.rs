use crate::hyper::HyperParameters;
use crate::mesh::{CapacityMesh, MeshNode};

use super::candidates::{Candidate, Frontier};

/// Everything a cost function may inspect when a neighbor is expanded.
pub struct Expansion<'a> {
    pub prev: &'a Candidate,
    pub prev_node: &'a MeshNode,
    pub node: &'a MeshNode,
    pub goal: &'a MeshNode,
    frontier: &'a Frontier,
    mesh: &'a CapacityMesh,
}

impl<'a> Expansion<'a> {
    pub(crate) fn new(
        frontier: &'a Frontier,
        mesh: &'a CapacityMesh,
        prev_index: u32,
        node: &'a MeshNode,
        goal: &'a MeshNode,
    ) -> Self {
        let prev = frontier.candidate(prev_index);
        Expansion {
            prev,
            prev_node: mesh.node(prev.node),
            node,
            goal,
            frontier,
            mesh,
        }
    }

    /// Iterates the predecessor chain starting at `prev`, walking toward
    /// the seed candidate.
    pub fn ancestors(&self) -> impl Iterator<Item = (&'a Candidate, &'a MeshNode)> + 'a {
        let frontier = self.frontier;
        let mesh = self.mesh;
        let mut cursor = Some(self.prev);
        std::iter::from_fn(move || {
            let candidate = cursor?;
            let node = mesh.node(candidate.node);
            cursor = candidate.prev.map(|idx| frontier.candidate(idx));
            Some((candidate, node))
        })
    }

    pub fn step_distance(&self) -> f64 {
        self.prev_node.rect.center.distance(&self.node.rect.center)
    }

    pub fn distance_to_goal(&self) -> f64 {
        self.node.rect.center.distance(&self.goal.rect.center)
    }
}

/// Cost and capacity hooks injected into the shared pathing engine. The
/// defaults implement plain greedy A* with exclusive node claims.
pub trait CostStrategy {
    fn compute_g(&self, expansion: &Expansion) -> f64 {
        expansion.prev.g + expansion.step_distance()
    }

    fn compute_h(&self, expansion: &Expansion) -> f64 {
        expansion.distance_to_goal()
    }

    fn node_has_capacity(&self, _node: &MeshNode, used: bool) -> bool {
        !used
    }
}

/// Straight-line costs, no extra shaping.
#[derive(Clone, Copy, Debug, Default)]
pub struct EuclideanCosts;

impl CostStrategy for EuclideanCosts {}

/// Surcharges long same-layer runs so a trace leaves room for others to
/// cross, waived once the path already changed layers more than once.
#[derive(Clone, Copy, Debug)]
pub struct LayerRunPenalty {
    pub penalty_per_step: f64,
}

impl Default for LayerRunPenalty {
    fn default() -> Self {
        LayerRunPenalty {
            penalty_per_step: 10.0,
        }
    }
}

impl LayerRunPenalty {
    /// Penalty taken from the `LAYER_TRAVERSAL_REWARD` tunable.
    pub fn from_hyper(hyper: &HyperParameters) -> Self {
        LayerRunPenalty {
            penalty_per_step: hyper.layer_traversal_reward,
        }
    }
}

impl CostStrategy for LayerRunPenalty {
    fn compute_g(&self, expansion: &Expansion) -> f64 {
        let base = expansion.prev.g + expansion.step_distance();

        let current_layer = expansion.node.available_z.first().copied().unwrap_or(0);
        let mut steps_since_layer_change = 0u32;
        let mut breaking_ancestor: Option<&Candidate> = None;
        for (candidate, node) in expansion.ancestors() {
            if node.available_z.first().copied().unwrap_or(0) == current_layer {
                steps_since_layer_change += 1;
            } else {
                breaking_ancestor = Some(candidate);
                break;
            }
        }

        let has_multiple_layer_changes =
            breaking_ancestor.is_some_and(|candidate| candidate.prev.is_some());
        let same_layer_penalty = if has_multiple_layer_changes {
            0.0
        } else {
            steps_since_layer_change as f64 * self.penalty_per_step
        };

        base + same_layer_penalty
    }
}
