//! Capacity-mesh autorouting core for printed circuit boards.
//!
//! Given a board description (bounds, optional outline, obstacles and
//! per-layer connection endpoints), the crate recursively subdivides the
//! board into a capacity mesh, derives adjacency edges, and routes each
//! connection with a greedy-biased best-first search that handles via
//! placement and layer designation. A hyperparameter supervisor retries a
//! solver under varied configurations, and a reassignment loop absorbs
//! vias into designated obstacles until a routing needs none at all.
//!
//! Every algorithm is a cooperative, single-threaded [`Solver`]: callers
//! drive it one `step` at a time or run it to completion under an
//! iteration budget.

pub mod board;
pub mod geometry;
pub mod hyper;
pub mod logging;
pub mod mesh;
pub mod pathing;
pub mod reassign;
pub mod solver;
pub mod traces;
pub mod viz;

pub use board::{BoardDescription, Bounds, Connection, ConnectionPoint, Obstacle, ObstacleId};
pub use geometry::{Point, Rect};
pub use hyper::{
    assignable_via_defs, HyperParameterDef, HyperParameterSupervisor, HyperParameters, ScoreFn,
    Supervised, SupervisorOptions,
};
pub use mesh::{
    adjacency, CapacityMesh, MeshBuilder, MeshEdge, MeshEdgeBuilder, MeshMode, MeshNode,
    MeshOptions, NodeId,
};
pub use pathing::{
    supervised_pathing, ConnectionPath, CostStrategy, EuclideanCosts, LayerRunPenalty,
    PathingParams, PathingSolver,
};
pub use reassign::{
    collect_via_sites, AssignableRoutingPipeline, LoopedReassignmentSolver,
    ObstacleAssignmentSolver, PipelineOptions, PipelineOutput, ViaSite,
};
pub use solver::{Solver, SolverError, SolverState};
pub use traces::{emit_traces, vias_present, RouteSegment, RoutedTrace};
pub use viz::Scene;
