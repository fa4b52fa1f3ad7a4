//! End-to-end routing scenarios over the full mesh → edges → pathing →
//! reassignment stack.

use capacity_router::{
    emit_traces, vias_present, BoardDescription, Bounds, Connection, ConnectionPoint,
    HyperParameters, LoopedReassignmentSolver, MeshBuilder, MeshEdgeBuilder, MeshMode, MeshNode,
    MeshOptions, NodeId, Obstacle, PathingParams, PathingSolver, PipelineOptions, Point, Rect,
    RouteSegment, Solver,
};

fn board(bounds: f64) -> BoardDescription {
    BoardDescription {
        layer_count: 2,
        min_trace_width: 0.2,
        min_via_diameter: None,
        bounds: Bounds {
            min_x: 0.0,
            max_x: bounds,
            min_y: 0.0,
            max_y: bounds,
        },
        outline: None,
        obstacles: Vec::new(),
        connections: Vec::new(),
    }
}

fn point(x: f64, y: f64, layer: &str) -> ConnectionPoint {
    ConnectionPoint {
        x,
        y,
        layer: layer.to_string(),
    }
}

#[test]
fn empty_board_meshes_to_one_node_and_routes_nothing() {
    let board = board(10.0);
    let mesh = MeshBuilder::build(&board, MeshMode::Standard, MeshOptions::default());
    assert_eq!(mesh.finished.len(), 1);

    let edges = MeshEdgeBuilder::build(&mesh);
    assert!(edges.is_empty());

    let mut solver = PathingSolver::new(PathingParams::new(
        mesh,
        edges,
        board.connections.clone(),
        board.layer_count,
    ))
    .unwrap();
    solver.solve().unwrap();
    assert!(solver.solved());
    assert!(solver.routes().is_empty());
}

#[test]
fn two_connections_never_share_a_node() {
    let mut board = board(10.0);
    board.connections = vec![
        Connection {
            name: "north".into(),
            points: vec![point(1.0, 2.0, "top"), point(9.0, 2.0, "top")],
        },
        Connection {
            name: "south".into(),
            points: vec![point(1.0, 8.0, "top"), point(9.0, 8.0, "top")],
        },
    ];

    let mesh = MeshBuilder::build(&board, MeshMode::Standard, MeshOptions::default());
    let edges = MeshEdgeBuilder::build(&mesh);
    let graph = capacity_router::adjacency(&edges);

    let mut solver = PathingSolver::new(PathingParams::new(
        mesh.clone(),
        edges,
        board.connections.clone(),
        board.layer_count,
    ))
    .unwrap();
    solver.solve().unwrap();

    let routes = solver.routes();
    assert_eq!(routes.len(), 2);

    for route in routes {
        assert!(route.nodes.len() >= 2);
        // Endpoint nodes contain the requested points.
        let first = mesh.node(route.nodes[0]);
        let last = mesh.node(*route.nodes.last().unwrap());
        let wanted_start = route.connection.points.first().unwrap();
        let wanted_end = route.connection.points.last().unwrap();
        assert!(first.rect.center.distance(&Point::new(wanted_start.x, wanted_start.y)) <= 1.0);
        assert!(last.rect.center.distance(&Point::new(wanted_end.x, wanted_end.y)) <= 1.0);
        // Consecutive nodes are adjacent in the edge graph.
        for pair in route.nodes.windows(2) {
            assert!(
                graph.contains_edge(pair[0], pair[1]),
                "{:?} -> {:?} missing from the edge graph",
                pair[0],
                pair[1]
            );
        }
    }

    let first: std::collections::HashSet<NodeId> = routes[0].nodes.iter().copied().collect();
    for id in &routes[1].nodes {
        assert!(!first.contains(id), "node {id:?} claimed by both nets");
    }
}

fn corridor_node(id: u32, x: f64, zs: Vec<usize>, target: Option<&str>) -> MeshNode {
    MeshNode {
        id: NodeId(id),
        rect: Rect::new(Point::new(x, 0.0), 2.0, 2.0),
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

#[test]
fn forced_via_travel_routes_through_both_directive_vias() {
    use capacity_router::{CapacityMesh, MeshEdge};

    let nodes = vec![
        corridor_node(0, 0.0, vec![0], Some("net1")),
        corridor_node(1, 2.0, vec![0], None),
        corridor_node(2, 4.0, vec![0, 1], None),
        corridor_node(3, 6.0, vec![1], None),
        corridor_node(4, 8.0, vec![0, 1], None),
        corridor_node(5, 10.0, vec![0], None),
        corridor_node(6, 12.0, vec![0], Some("net1")),
    ];
    let finished = nodes.iter().map(|n| n.id).collect();
    let mesh = CapacityMesh { nodes, finished };
    let edges: Vec<MeshEdge> = (0..6)
        .map(|i| MeshEdge {
            nodes: [NodeId(i), NodeId(i + 1)],
        })
        .collect();

    let mut params = PathingParams::new(
        mesh.clone(),
        edges,
        vec![Connection {
            name: "net1".into(),
            points: vec![point(0.0, 0.0, "top"), point(12.0, 0.0, "top")],
        }],
        2,
    );
    params.hyper = HyperParameters {
        force_via_travel_chance: 1.0,
        far_via_min_distance: 1.0,
        ..HyperParameters::default()
    };

    let mut solver = PathingSolver::new(params).unwrap();
    solver.solve().unwrap();

    let routes = solver.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(
        routes[0].nodes,
        vec![
            NodeId(0),
            NodeId(1),
            NodeId(2),
            NodeId(3),
            NodeId(4),
            NodeId(5),
            NodeId(6)
        ]
    );

    let traces = emit_traces(routes, &mesh, 0.2);
    let vias: Vec<&RouteSegment> = traces[0].vias().collect();
    assert_eq!(vias.len(), 2);
    assert_eq!(
        vias[0],
        &RouteSegment::Via {
            x: 4.0,
            y: 0.0,
            from_layer: 0,
            to_layer: 1,
        }
    );
    assert_eq!(
        vias[1],
        &RouteSegment::Via {
            x: 8.0,
            y: 0.0,
            from_layer: 1,
            to_layer: 0,
        }
    );
}

/// One assignable two-layer obstacle in the middle, one connection that
/// needs both layers: the loop must absorb the via into the obstacle and
/// converge to a zero-via routing within two passes.
#[test]
fn reassignment_loop_converges_to_zero_vias() {
    let mut board = board(10.0);
    board.obstacles = vec![Obstacle {
        rect: Rect::new(Point::new(5.0, 5.0), 2.0, 2.0),
        layers: vec!["top".into(), "bottom".into()],
        connected_to: vec![],
        net_is_assignable: true,
    }];
    board.connections = vec![Connection {
        name: "net1".into(),
        points: vec![point(1.0, 5.0, "top"), point(9.0, 5.0, "bottom")],
    }];

    let mut solver = LoopedReassignmentSolver::new(board, PipelineOptions::default());
    solver.solve().unwrap();

    assert!(solver.passes_started() <= 2);

    let (final_board, output) = solver.into_output();

    // Converged output carries no via segment in any trace.
    assert!(!vias_present(&output.traces));
    for trace in &output.traces {
        for segment in &trace.route {
            assert!(matches!(segment, RouteSegment::Wire { .. }));
        }
    }

    // The absorbing obstacle is no longer assignable and owns the split
    // connections.
    let obstacle = &final_board.obstacles[0];
    assert!(!obstacle.net_is_assignable);
    assert!(!obstacle.connected_to.is_empty());

    // The via-adjacent connection became exactly two single-layer
    // connections terminated at the obstacle center.
    assert_eq!(final_board.connections.len(), 2);
    for connection in &final_board.connections {
        let layers: std::collections::HashSet<&str> = connection
            .points
            .iter()
            .map(|p| p.layer.as_str())
            .collect();
        assert_eq!(layers.len(), 1, "{} spans layers", connection.name);
        assert!(connection
            .points
            .iter()
            .any(|p| p.x == 5.0 && p.y == 5.0));
    }
    assert_eq!(output.routes.len(), 2);
}
