//! Zero-via convergence: alternates a full routing pass with an obstacle
//! assignment pass on a cloned board description until the routed output
//! needs no vias.

use crate::board::{layer_name_to_z, z_to_layer_name, BoardDescription, Connection, ConnectionPoint};
use crate::geometry::Point;
use crate::hyper::{assignable_via_defs, HyperParameters, HyperParameterSupervisor, SupervisorOptions};
use crate::mesh::{CapacityMesh, MeshBuilder, MeshEdge, MeshEdgeBuilder, MeshMode, MeshOptions};
use crate::pathing::{supervised_pathing, ConnectionPath, PathingParams, PathingSolver};
use crate::solver::{Solver, SolverError, SolverState};
use crate::traces::{emit_traces, vias_present, RouteSegment, RoutedTrace};
use crate::viz::Scene;

#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    pub mesh: MeshOptions,
    pub hyper: HyperParameters,
    pub supervisor: SupervisorOptions,
}

/// Everything a completed routing pass produces.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub mesh: CapacityMesh,
    pub routes: Vec<ConnectionPath>,
    pub traces: Vec<RoutedTrace>,
}

enum PipelineStage {
    Mesh(MeshBuilder),
    Edges {
        mesh: CapacityMesh,
        builder: MeshEdgeBuilder,
    },
    Pathing {
        mesh: CapacityMesh,
        supervisor: HyperParameterSupervisor<PathingSolver>,
    },
}

/// The routing pass used inside the reassignment loop: assignable-via
/// mesh, edge derivation, then supervised pathing, driven one sub-step at
/// a time.
pub struct AssignableRoutingPipeline {
    state: SolverState,
    max_iterations: u64,
    board: BoardDescription,
    opts: PipelineOptions,
    stage: Option<PipelineStage>,
    output: Option<PipelineOutput>,
}

impl AssignableRoutingPipeline {
    pub fn new(board: BoardDescription, opts: PipelineOptions) -> Self {
        AssignableRoutingPipeline {
            state: SolverState::default(),
            max_iterations: 1_000_000,
            board,
            opts,
            stage: None,
            output: None,
        }
    }

    pub fn output(&self) -> Option<&PipelineOutput> {
        self.output.as_ref()
    }

    pub fn into_output(self) -> PipelineOutput {
        self.output
            .expect("pipeline output requested before the pipeline solved")
    }
}

impl Solver for AssignableRoutingPipeline {
    fn name(&self) -> &'static str {
        "assignable_routing_pipeline"
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
        match self.stage.take() {
            None => {
                self.stage = Some(PipelineStage::Mesh(MeshBuilder::new(
                    &self.board,
                    MeshMode::AssignableVias,
                    self.opts.mesh.clone(),
                )));
            }
            Some(PipelineStage::Mesh(mut builder)) => {
                builder.step();
                if builder.failed() {
                    let error = builder.error().cloned().expect("failed solver has an error");
                    self.state.fail(error);
                } else if builder.solved() {
                    let mesh = builder.into_mesh();
                    let edge_builder = MeshEdgeBuilder::new(&mesh);
                    self.stage = Some(PipelineStage::Edges {
                        mesh,
                        builder: edge_builder,
                    });
                } else {
                    self.stage = Some(PipelineStage::Mesh(builder));
                }
            }
            Some(PipelineStage::Edges { mesh, mut builder }) => {
                builder.step();
                if builder.failed() {
                    let error = builder.error().cloned().expect("failed solver has an error");
                    self.state.fail(error);
                } else if builder.solved() {
                    let edges: Vec<MeshEdge> = builder.into_edges();
                    let params = PathingParams {
                        mesh: mesh.clone(),
                        edges,
                        connections: self.board.connections.clone(),
                        layer_count: self.board.layer_count,
                        hyper: self.opts.hyper.clone(),
                        max_iterations: 1_000_000,
                    };
                    let supervisor = supervised_pathing(
                        params,
                        assignable_via_defs(),
                        self.opts.supervisor.clone(),
                    );
                    self.stage = Some(PipelineStage::Pathing { mesh, supervisor });
                } else {
                    self.stage = Some(PipelineStage::Edges { mesh, builder });
                }
            }
            Some(PipelineStage::Pathing {
                mesh,
                mut supervisor,
            }) => {
                if supervisor.iterations() >= supervisor.max_iterations() {
                    let error = SolverError::IterationBudgetExceeded {
                        solver: supervisor.name(),
                        iterations: supervisor.iterations(),
                    };
                    supervisor.state_mut().fail(error.clone());
                    self.state.fail(error);
                    return;
                }
                supervisor.step();
                if supervisor.failed() {
                    let error = supervisor
                        .error()
                        .cloned()
                        .expect("failed solver has an error");
                    self.state.fail(error);
                } else if supervisor.solved() {
                    let routes = supervisor.into_winner().into_routes();
                    let traces = emit_traces(&routes, &mesh, self.board.min_trace_width);
                    self.output = Some(PipelineOutput {
                        mesh,
                        routes,
                        traces,
                    });
                    self.state.finish();
                } else {
                    self.stage = Some(PipelineStage::Pathing { mesh, supervisor });
                }
            }
        }
    }

    fn visualize(&self) -> Scene {
        match &self.stage {
            Some(PipelineStage::Mesh(builder)) => builder.visualize(),
            Some(PipelineStage::Edges { builder, .. }) => builder.visualize(),
            Some(PipelineStage::Pathing { supervisor, .. }) => supervisor.visualize(),
            None => Scene::default(),
        }
    }
}

/// A via observed in a routed trace, together with the connection that
/// produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct ViaSite {
    pub x: f64,
    pub y: f64,
    pub from_layer: usize,
    pub to_layer: usize,
    pub connection: String,
}

pub fn collect_via_sites(traces: &[RoutedTrace]) -> Vec<ViaSite> {
    let mut sites = Vec::new();
    for trace in traces {
        for segment in &trace.route {
            if let RouteSegment::Via {
                x,
                y,
                from_layer,
                to_layer,
            } = segment
            {
                sites.push(ViaSite {
                    x: *x,
                    y: *y,
                    from_layer: *from_layer,
                    to_layer: *to_layer,
                    connection: trace.connection.clone(),
                });
            }
        }
    }
    sites
}

/// Absorbs vias into assignable obstacles, one via per step: the nearest
/// still-assignable obstacle sharing one of the via's layers loses its
/// assignable flag and the via's connection is split into two single-layer
/// connections terminated at the obstacle center.
pub struct ObstacleAssignmentSolver {
    state: SolverState,
    board: BoardDescription,
    vias: Vec<ViaSite>,
    cursor: usize,
    assigned: usize,
}

impl ObstacleAssignmentSolver {
    pub fn new(board: BoardDescription, vias: Vec<ViaSite>) -> Self {
        ObstacleAssignmentSolver {
            state: SolverState::default(),
            board,
            vias,
            cursor: 0,
            assigned: 0,
        }
    }

    pub fn assigned_count(&self) -> usize {
        self.assigned
    }

    pub fn into_board(self) -> BoardDescription {
        assert!(
            self.state.solved,
            "board requested before the assignment pass solved"
        );
        self.board
    }

    fn closest_assignable_obstacle(&self, via: &ViaSite) -> Option<usize> {
        let via_point = Point::new(via.x, via.y);
        let layer_count = self.board.layer_count;
        self.board
            .obstacles
            .iter()
            .enumerate()
            .filter(|(_, obstacle)| obstacle.net_is_assignable)
            .filter(|(_, obstacle)| {
                let zs = obstacle.available_z(layer_count);
                zs.contains(&via.from_layer) || zs.contains(&via.to_layer)
            })
            .min_by(|(_, a), (_, b)| {
                a.rect
                    .center
                    .distance(&via_point)
                    .total_cmp(&b.rect.center.distance(&via_point))
            })
            .map(|(index, _)| index)
    }

    fn assign(&mut self, obstacle_index: usize, via: &ViaSite) {
        self.board.obstacles[obstacle_index].net_is_assignable = false;
        self.assigned += 1;
        tracing::debug!(
            connection = %via.connection,
            obstacle = obstacle_index,
            "assignable obstacle absorbs via"
        );
        self.split_connection(obstacle_index, via);
    }

    fn split_connection(&mut self, obstacle_index: usize, via: &ViaSite) {
        let layer_count = self.board.layer_count;
        let center = self.board.obstacles[obstacle_index].rect.center;
        let from_name = z_to_layer_name(via.from_layer, layer_count);
        let to_name = z_to_layer_name(via.to_layer, layer_count);

        let Some(connection_index) = self
            .board
            .connections
            .iter()
            .position(|connection| connection.name == via.connection)
        else {
            self.append_to_obstacle(obstacle_index, via.connection.clone());
            return;
        };

        let original = self.board.connections[connection_index].clone();
        let from_points: Vec<ConnectionPoint> = original
            .points
            .iter()
            .filter(|p| layer_name_to_z(&p.layer, layer_count) == Some(via.from_layer))
            .cloned()
            .collect();
        let to_points: Vec<ConnectionPoint> = original
            .points
            .iter()
            .filter(|p| layer_name_to_z(&p.layer, layer_count) == Some(via.to_layer))
            .cloned()
            .collect();

        let split_name_from = format!("{}_{}", original.name, from_name);
        let split_name_to = format!("{}_{}", original.name, to_name);
        let anchor_from = ConnectionPoint {
            x: center.x,
            y: center.y,
            layer: from_name,
        };
        let anchor_to = ConnectionPoint {
            x: center.x,
            y: center.y,
            layer: to_name,
        };

        let (first, second) = if from_points.is_empty() || to_points.is_empty() {
            // Every point sits on one layer: the via exists only to pass
            // through the other layer. Split a two-point connection
            // spatially at the absorbing obstacle.
            if original.points.len() != 2 {
                self.append_to_obstacle(obstacle_index, original.name);
                return;
            }
            let first = Connection {
                name: split_name_from.clone(),
                points: vec![original.points[0].clone(), anchor_from],
            };
            let second = Connection {
                name: split_name_to.clone(),
                points: vec![anchor_to, original.points[1].clone()],
            };
            (first, second)
        } else {
            let mut first_points = from_points;
            first_points.push(anchor_from);
            let mut second_points = to_points;
            second_points.push(anchor_to);
            (
                Connection {
                    name: split_name_from.clone(),
                    points: first_points,
                },
                Connection {
                    name: split_name_to.clone(),
                    points: second_points,
                },
            )
        };

        let obstacle = &mut self.board.obstacles[obstacle_index];
        obstacle.connected_to.retain(|name| *name != original.name);
        for name in [&split_name_from, &split_name_to] {
            if !obstacle.connected_to.contains(name) {
                obstacle.connected_to.push(name.clone());
            }
        }

        self.board.connections.remove(connection_index);
        self.board.connections.push(first);
        self.board.connections.push(second);
    }

    fn append_to_obstacle(&mut self, obstacle_index: usize, name: String) {
        let obstacle = &mut self.board.obstacles[obstacle_index];
        if !obstacle.connected_to.contains(&name) {
            obstacle.connected_to.push(name);
        }
    }
}

impl Solver for ObstacleAssignmentSolver {
    fn name(&self) -> &'static str {
        "obstacle_assignment"
    }

    fn state(&self) -> &SolverState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SolverState {
        &mut self.state
    }

    fn max_iterations(&self) -> u64 {
        10_000
    }

    fn step_once(&mut self) {
        if self.cursor >= self.vias.len() {
            self.state.finish();
            return;
        }
        if !self
            .board
            .obstacles
            .iter()
            .any(|obstacle| obstacle.net_is_assignable)
        {
            self.state.finish();
            return;
        }

        let via = self.vias[self.cursor].clone();
        if let Some(obstacle_index) = self.closest_assignable_obstacle(&via) {
            self.assign(obstacle_index, &via);
        }
        self.cursor += 1;
    }
}

enum Pass {
    Pipeline(AssignableRoutingPipeline),
    Assignment(ObstacleAssignmentSolver),
}

/// Runs routing passes and assignment passes in alternation until a pass
/// routes every connection without a single via. The input board is never
/// mutated; each inner pass works on its own derived copy.
pub struct LoopedReassignmentSolver {
    state: SolverState,
    max_iterations: u64,
    opts: PipelineOptions,
    board: BoardDescription,
    pass: Option<Pass>,
    passes_started: usize,
    max_passes: usize,
    output: Option<PipelineOutput>,
}

impl LoopedReassignmentSolver {
    pub fn new(board: BoardDescription, opts: PipelineOptions) -> Self {
        LoopedReassignmentSolver {
            state: SolverState::default(),
            max_iterations: 2_000_000,
            opts,
            board,
            pass: None,
            passes_started: 0,
            max_passes: 8,
            output: None,
        }
    }

    /// The board description carrying the obstacle assignments made so
    /// far.
    pub fn board(&self) -> &BoardDescription {
        &self.board
    }

    pub fn passes_started(&self) -> usize {
        self.passes_started
    }

    pub fn output(&self) -> Option<&PipelineOutput> {
        self.output.as_ref()
    }

    pub fn into_output(self) -> (BoardDescription, PipelineOutput) {
        let output = self
            .output
            .expect("output requested before the reassignment loop converged");
        (self.board, output)
    }
}

impl Solver for LoopedReassignmentSolver {
    fn name(&self) -> &'static str {
        "looped_reassignment"
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
        match self.pass.take() {
            None => {
                if self.passes_started >= self.max_passes {
                    let error = SolverError::IterationBudgetExceeded {
                        solver: self.name(),
                        iterations: self.state.iterations,
                    };
                    self.state.fail(error);
                    return;
                }
                self.passes_started += 1;
                tracing::info!(pass = self.passes_started, "starting routing pass");
                self.pass = Some(Pass::Pipeline(AssignableRoutingPipeline::new(
                    self.board.clone(),
                    self.opts.clone(),
                )));
            }
            Some(Pass::Pipeline(mut pipeline)) => {
                if pipeline.iterations() >= pipeline.max_iterations() {
                    let error = SolverError::IterationBudgetExceeded {
                        solver: pipeline.name(),
                        iterations: pipeline.iterations(),
                    };
                    self.state.fail(error);
                    return;
                }
                pipeline.step();
                if pipeline.failed() {
                    let error = pipeline
                        .error()
                        .cloned()
                        .expect("failed solver has an error");
                    self.state.fail(error);
                } else if pipeline.solved() {
                    let output = pipeline.into_output();
                    if vias_present(&output.traces) {
                        let vias = collect_via_sites(&output.traces);
                        tracing::info!(vias = vias.len(), "routing pass still places vias");
                        self.pass = Some(Pass::Assignment(ObstacleAssignmentSolver::new(
                            self.board.clone(),
                            vias,
                        )));
                    } else {
                        tracing::info!(
                            passes = self.passes_started,
                            "converged to a zero-via routing"
                        );
                        self.output = Some(output);
                        self.state.finish();
                    }
                } else {
                    self.pass = Some(Pass::Pipeline(pipeline));
                }
            }
            Some(Pass::Assignment(mut assignment)) => {
                assignment.step();
                if assignment.failed() {
                    let error = assignment
                        .error()
                        .cloned()
                        .expect("failed solver has an error");
                    self.state.fail(error);
                } else if assignment.solved() {
                    if assignment.assigned_count() == 0 {
                        // No obstacle can absorb any remaining via: the
                        // loop cannot make further progress.
                        let connection = assignment
                            .vias
                            .first()
                            .map(|via| via.connection.clone())
                            .unwrap_or_default();
                        self.state
                            .fail(SolverError::ViaCandidatesExhausted { connection });
                        return;
                    }
                    self.board = assignment.into_board();
                    self.pass = None;
                } else {
                    self.pass = Some(Pass::Assignment(assignment));
                }
            }
        }
    }

    fn visualize(&self) -> Scene {
        match &self.pass {
            Some(Pass::Pipeline(pipeline)) => pipeline.visualize(),
            Some(Pass::Assignment(_)) => Scene::titled("obstacle assignment"),
            None => Scene::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Bounds, Obstacle};
    use crate::geometry::Rect;

    fn board_with_assignable_middle() -> BoardDescription {
        BoardDescription {
            layer_count: 2,
            min_trace_width: 0.2,
            min_via_diameter: None,
            bounds: Bounds {
                min_x: 0.0,
                max_x: 10.0,
                min_y: 0.0,
                max_y: 10.0,
            },
            outline: None,
            obstacles: vec![Obstacle {
                rect: Rect::new(Point::new(5.0, 5.0), 2.0, 2.0),
                layers: vec!["top".into(), "bottom".into()],
                connected_to: vec![],
                net_is_assignable: true,
            }],
            connections: vec![Connection {
                name: "net1".into(),
                points: vec![
                    ConnectionPoint {
                        x: 1.0,
                        y: 5.0,
                        layer: "top".into(),
                    },
                    ConnectionPoint {
                        x: 9.0,
                        y: 5.0,
                        layer: "bottom".into(),
                    },
                ],
            }],
        }
    }

    #[test]
    fn assignment_splits_connection_at_obstacle_center() {
        let board = board_with_assignable_middle();
        let vias = vec![ViaSite {
            x: 5.0,
            y: 5.0,
            from_layer: 0,
            to_layer: 1,
            connection: "net1".into(),
        }];
        let mut solver = ObstacleAssignmentSolver::new(board, vias);
        solver.solve().unwrap();
        assert_eq!(solver.assigned_count(), 1);

        let board = solver.into_board();
        let obstacle = &board.obstacles[0];
        assert!(!obstacle.net_is_assignable);
        assert_eq!(
            obstacle.connected_to,
            vec!["net1_top".to_string(), "net1_bottom".to_string()]
        );

        assert_eq!(board.connections.len(), 2);
        let top = board
            .connections
            .iter()
            .find(|c| c.name == "net1_top")
            .unwrap();
        let bottom = board
            .connections
            .iter()
            .find(|c| c.name == "net1_bottom")
            .unwrap();
        assert!(top.points.iter().all(|p| p.layer == "top"));
        assert!(bottom.points.iter().all(|p| p.layer == "bottom"));
        assert!(top
            .points
            .iter()
            .any(|p| p.x == 5.0 && p.y == 5.0));
        assert!(bottom
            .points
            .iter()
            .any(|p| p.x == 5.0 && p.y == 5.0));
    }

    #[test]
    fn same_layer_connection_splits_spatially() {
        let mut board = board_with_assignable_middle();
        board.connections[0].points[1].layer = "top".into();
        let vias = vec![ViaSite {
            x: 5.0,
            y: 5.0,
            from_layer: 0,
            to_layer: 1,
            connection: "net1".into(),
        }];
        let mut solver = ObstacleAssignmentSolver::new(board, vias);
        solver.solve().unwrap();
        let board = solver.into_board();
        assert_eq!(board.connections.len(), 2);
        let first = board
            .connections
            .iter()
            .find(|c| c.name == "net1_top")
            .unwrap();
        let second = board
            .connections
            .iter()
            .find(|c| c.name == "net1_bottom")
            .unwrap();
        assert_eq!(first.points.len(), 2);
        assert_eq!(second.points.len(), 2);
        assert_eq!(first.points[1].layer, "top");
        assert_eq!(second.points[0].layer, "bottom");
    }

    #[test]
    fn assignment_without_candidates_reports_nothing_assigned() {
        let mut board = board_with_assignable_middle();
        board.obstacles[0].net_is_assignable = false;
        let vias = vec![ViaSite {
            x: 5.0,
            y: 5.0,
            from_layer: 0,
            to_layer: 1,
            connection: "net1".into(),
        }];
        let mut solver = ObstacleAssignmentSolver::new(board, vias);
        solver.solve().unwrap();
        assert_eq!(solver.assigned_count(), 0);
    }

    #[test]
    fn via_sites_preserve_trace_order() {
        let traces = vec![
            RoutedTrace {
                connection: "a".into(),
                route: vec![
                    RouteSegment::Via {
                        x: 1.0,
                        y: 1.0,
                        from_layer: 0,
                        to_layer: 1,
                    },
                    RouteSegment::Via {
                        x: 2.0,
                        y: 2.0,
                        from_layer: 1,
                        to_layer: 0,
                    },
                ],
            },
            RoutedTrace {
                connection: "b".into(),
                route: vec![RouteSegment::Via {
                    x: 3.0,
                    y: 3.0,
                    from_layer: 0,
                    to_layer: 1,
                }],
            },
        ];
        let sites = collect_via_sites(&traces);
        assert_eq!(sites.len(), 3);
        assert_eq!(sites[0].connection, "a");
        assert_eq!(sites[2].connection, "b");
        assert_eq!(sites[2].x, 3.0);
    }
}
