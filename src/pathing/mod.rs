mod candidates;
mod solver;
mod strategy;

pub use candidates::{Candidate, Frontier};
pub use solver::{ConnectionPath, PathingParams, PathingSolver};
pub use strategy::{CostStrategy, EuclideanCosts, Expansion, LayerRunPenalty};

use crate::hyper::{HyperParameterDef, HyperParameterSupervisor, SupervisorOptions};

/// Wraps the pathing solver in a hyperparameter supervisor exploring the
/// given configuration catalogue. Each configuration gets its own solver
/// built from a fresh copy of the parameters.
pub fn supervised_pathing(
    params: PathingParams,
    defs: Vec<HyperParameterDef>,
    opts: SupervisorOptions,
) -> HyperParameterSupervisor<PathingSolver> {
    let base = params.hyper.clone();
    HyperParameterSupervisor::new(
        base,
        defs,
        opts,
        Box::new(move |hyper| {
            let mut config = params.clone();
            config.hyper = hyper;
            PathingSolver::new(config)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Connection, ConnectionPoint};
    use crate::geometry::{Point, Rect};
    use crate::hyper::HyperParameters;
    use crate::mesh::{CapacityMesh, MeshEdge, MeshNode, NodeId};
    use crate::solver::{Solver, SolverError};

    pub(crate) fn test_node(
        id: u32,
        x: f64,
        y: f64,
        zs: Vec<usize>,
        target: Option<&str>,
    ) -> MeshNode {
        MeshNode {
            id: NodeId(id),
            rect: Rect::new(Point::new(x, y), 2.0, 2.0),
            available_z: zs,
            depth: 0,
            parent: None,
            contains_obstacle: false,
            completely_inside_obstacle: false,
            contains_target: target.is_some(),
            target_connection: target.map(str::to_string),
            assigned_obstacle: None,
        }
    }

    fn edge(a: u32, b: u32) -> MeshEdge {
        MeshEdge {
            nodes: [NodeId(a), NodeId(b)],
        }
    }

    fn connection(name: &str, points: &[(f64, f64, &str)]) -> Connection {
        Connection {
            name: name.to_string(),
            points: points
                .iter()
                .map(|(x, y, layer)| ConnectionPoint {
                    x: *x,
                    y: *y,
                    layer: layer.to_string(),
                })
                .collect(),
        }
    }

    fn mesh_of(nodes: Vec<MeshNode>) -> CapacityMesh {
        let finished = nodes.iter().map(|n| n.id).collect();
        CapacityMesh { nodes, finished }
    }

    #[test]
    fn routes_a_straight_corridor() {
        let mesh = mesh_of(vec![
            test_node(0, 1.0, 1.0, vec![0], Some("net1")),
            test_node(1, 3.0, 1.0, vec![0], None),
            test_node(2, 5.0, 1.0, vec![0], None),
            test_node(3, 7.0, 1.0, vec![0], Some("net1")),
        ]);
        let edges = vec![edge(0, 1), edge(1, 2), edge(2, 3)];
        let connections = vec![connection(
            "net1",
            &[(1.0, 1.0, "top"), (7.0, 1.0, "top")],
        )];

        let mut solver =
            PathingSolver::new(PathingParams::new(mesh, edges, connections, 2)).unwrap();
        solver.solve().unwrap();

        let routes = solver.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(
            routes[0].nodes,
            vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]
        );
        for id in &routes[0].nodes {
            assert!(solver.is_node_used(*id));
        }
    }

    #[test]
    fn consecutive_route_nodes_are_adjacent() {
        let mesh = mesh_of(vec![
            test_node(0, 1.0, 1.0, vec![0], Some("net1")),
            test_node(1, 3.0, 1.0, vec![0], None),
            test_node(2, 3.0, 3.0, vec![0], None),
            test_node(3, 5.0, 1.0, vec![0], None),
            test_node(4, 5.0, 3.0, vec![0], Some("net1")),
        ]);
        let edges = vec![edge(0, 1), edge(1, 2), edge(1, 3), edge(2, 4), edge(3, 4)];
        let connections = vec![connection(
            "net1",
            &[(1.0, 1.0, "top"), (5.0, 3.0, "top")],
        )];

        let mut solver = PathingSolver::new(PathingParams::new(
            mesh,
            edges.clone(),
            connections,
            2,
        ))
        .unwrap();
        solver.solve().unwrap();

        let graph = crate::mesh::adjacency(&edges);
        let route = &solver.routes()[0];
        for pair in route.nodes.windows(2) {
            assert!(
                graph.contains_edge(pair[0], pair[1]),
                "{:?} -> {:?} is not a mesh edge",
                pair[0],
                pair[1]
            );
        }
    }

    /// Two nets both need the single available via; the reservation
    /// bookkeeping must give it to exactly one of them and fail the other
    /// explicitly.
    #[test]
    fn contested_via_goes_to_one_connection() {
        let mesh = mesh_of(vec![
            test_node(0, 2.0, 2.0, vec![0, 1], None), // the only via
            test_node(1, 0.0, 2.0, vec![0], Some("net_a")),
            test_node(2, 4.0, 2.0, vec![1], Some("net_a")),
            test_node(3, 2.0, 0.0, vec![0], Some("net_b")),
            test_node(4, 2.0, 4.0, vec![1], Some("net_b")),
        ]);
        let edges = vec![edge(1, 0), edge(0, 2), edge(3, 0), edge(0, 4)];
        let connections = vec![
            connection("net_a", &[(0.0, 2.0, "top"), (4.0, 2.0, "bottom")]),
            connection("net_b", &[(2.0, 0.0, "top"), (2.0, 4.0, "bottom")]),
        ];

        let mut solver =
            PathingSolver::new(PathingParams::new(mesh, edges, connections, 2)).unwrap();
        let result = solver.solve();

        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            SolverError::NoViableCandidates { .. }
        ));
        // Exactly one net claimed the via and produced a layer-valid path.
        assert_eq!(solver.routes().len(), 1);
        let route = &solver.routes()[0];
        assert!(route.nodes.contains(&NodeId(0)));
    }

    #[test]
    fn solved_with_zero_connections() {
        let mesh = mesh_of(vec![test_node(0, 1.0, 1.0, vec![0, 1], None)]);
        let mut solver =
            PathingSolver::new(PathingParams::new(mesh, Vec::new(), Vec::new(), 2)).unwrap();
        solver.solve().unwrap();
        assert!(solver.solved());
        assert!(solver.routes().is_empty());
    }

    #[test]
    fn unresolvable_endpoint_is_reported() {
        let mesh = mesh_of(vec![test_node(0, 1.0, 1.0, vec![0], Some("net1"))]);
        let connections = vec![connection(
            "net1",
            &[(1.0, 1.0, "top"), (50.0, 50.0, "top")],
        )];
        let result = PathingSolver::new(PathingParams::new(mesh, Vec::new(), connections, 2));
        assert!(matches!(
            result.unwrap_err(),
            SolverError::UnresolvedEndpoint { connection, .. } if connection == "net1"
        ));
    }

    #[test]
    fn layer_run_penalty_prefers_layer_changes() {
        // Two parallel corridors; the penalized strategy should hop to the
        // second layer through the via instead of running the whole top
        // corridor.
        let mesh = mesh_of(vec![
            test_node(0, 0.0, 0.0, vec![0], Some("net1")),
            test_node(1, 2.0, 0.0, vec![0, 1], None),
            test_node(2, 4.0, 0.0, vec![0, 1], None),
            test_node(3, 6.0, 0.0, vec![0], Some("net1")),
        ]);
        let edges = vec![edge(0, 1), edge(1, 2), edge(2, 3)];
        let connections = vec![connection(
            "net1",
            &[(0.0, 0.0, "top"), (6.0, 0.0, "top")],
        )];
        let mut params = PathingParams::new(mesh, edges, connections, 2);
        params.hyper = HyperParameters::default();

        let strategy = Box::new(LayerRunPenalty::from_hyper(&params.hyper));
        let mut solver = PathingSolver::with_strategy(params, strategy).unwrap();
        solver.solve().unwrap();
        assert_eq!(solver.routes().len(), 1);
    }

    #[test]
    fn supervisor_routes_an_easy_board() {
        use crate::hyper::SupervisorOptions;

        let mesh = mesh_of(vec![
            test_node(0, 1.0, 1.0, vec![0], Some("net1")),
            test_node(1, 3.0, 1.0, vec![0], None),
            test_node(2, 5.0, 1.0, vec![0], Some("net1")),
        ]);
        let edges = vec![edge(0, 1), edge(1, 2)];
        let connections = vec![connection(
            "net1",
            &[(1.0, 1.0, "top"), (5.0, 1.0, "top")],
        )];

        let params = PathingParams::new(mesh, edges, connections, 2);
        let mut supervisor = supervised_pathing(
            params,
            crate::hyper::assignable_via_defs(),
            SupervisorOptions::default(),
        );
        supervisor.solve().unwrap();

        let winner = supervisor.into_winner();
        assert_eq!(winner.routes().len(), 1);
        assert_eq!(
            winner.routes()[0].nodes,
            vec![NodeId(0), NodeId(1), NodeId(2)]
        );
    }
}
