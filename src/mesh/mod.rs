mod builder;
mod edges;
mod node;

pub use builder::{MeshBuilder, MeshMode, MeshOptions};
pub use edges::{adjacency, MeshEdge, MeshEdgeBuilder};
pub use node::{CapacityMesh, MeshNode, NodeId};
