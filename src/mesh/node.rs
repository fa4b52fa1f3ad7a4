use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::board::ObstacleId;
use crate::geometry::Rect;

/// Stable index of a mesh node in its mesh's node arena. Node identifiers
/// never move or get reused within one mesh.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl<T> Index<NodeId> for Vec<T> {
    type Output = T;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl<T> IndexMut<NodeId> for Vec<T> {
    fn index_mut(&mut self, index: NodeId) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

/// A rectangular region of the board, the routing graph's vertex.
///
/// The parent reference is provenance only: children never mutate their
/// parent, and the parent may itself be an interior (non-finished) node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshNode {
    pub id: NodeId,
    pub rect: Rect,
    /// Z indices this node spans. More than one entry makes the node a via
    /// candidate.
    pub available_z: Vec<usize>,
    pub depth: u32,
    pub parent: Option<NodeId>,
    pub contains_obstacle: bool,
    pub completely_inside_obstacle: bool,
    pub contains_target: bool,
    /// Name of the connection owning the contained target, when any.
    pub target_connection: Option<String>,
    /// Set when an assignable obstacle was collapsed into this node.
    pub assigned_obstacle: Option<ObstacleId>,
}

impl MeshNode {
    pub fn is_multi_layer(&self) -> bool {
        self.available_z.len() > 1
    }

    pub fn has_layer(&self, z: usize) -> bool {
        self.available_z.contains(&z)
    }
}

/// The node arena plus the subset of identifiers that survived
/// subdivision. Interior nodes stay in the arena so parent references keep
/// resolving.
#[derive(Clone, Debug, Default)]
pub struct CapacityMesh {
    pub nodes: Vec<MeshNode>,
    pub finished: Vec<NodeId>,
}

impl CapacityMesh {
    pub fn node(&self, id: NodeId) -> &MeshNode {
        &self.nodes[id]
    }

    pub fn finished_nodes(&self) -> impl Iterator<Item = &MeshNode> {
        self.finished.iter().map(|id| &self.nodes[*id])
    }
}
