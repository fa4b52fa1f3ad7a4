use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graphmap::UnGraphMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::board::{layer_name_to_z, Connection};
use crate::hyper::{HyperParameters, Supervised};
use crate::mesh::{adjacency, CapacityMesh, MeshEdge, NodeId};
use crate::solver::{Solver, SolverError, SolverState};
use crate::viz::{CircleMark, Line, PointMark, RectMark, Scene};

use super::candidates::{Candidate, Frontier};
use super::strategy::{CostStrategy, EuclideanCosts, Expansion};

/// A connection resolved to the mesh nodes containing its endpoints.
#[derive(Clone, Debug)]
struct ConnectionPair {
    start: NodeId,
    end: NodeId,
    connection: Connection,
}

/// One layer-bounded leg of a connection's route.
#[derive(Clone, Debug)]
struct Subpath {
    start: NodeId,
    end: NodeId,
    layer: usize,
    solved: bool,
    path: Option<Vec<NodeId>>,
}

/// A fully routed connection: the ordered mesh nodes its trace occupies.
#[derive(Clone, Debug)]
pub struct ConnectionPath {
    pub connection: Connection,
    pub nodes: Vec<NodeId>,
}

#[derive(Clone, Debug)]
pub struct PathingParams {
    pub mesh: CapacityMesh,
    pub edges: Vec<MeshEdge>,
    pub connections: Vec<Connection>,
    pub layer_count: usize,
    pub hyper: HyperParameters,
    pub max_iterations: u64,
}

impl PathingParams {
    pub fn new(
        mesh: CapacityMesh,
        edges: Vec<MeshEdge>,
        connections: Vec<Connection>,
        layer_count: usize,
    ) -> Self {
        PathingParams {
            mesh,
            edges,
            connections,
            layer_count,
            hyper: HyperParameters::default(),
            max_iterations: 1_000_000,
        }
    }
}

/// Greedy-biased best-first pathing over the capacity mesh.
///
/// Connections are processed one at a time in seeded-shuffle order. Each
/// connection may be split into layer-designated subpaths around directive
/// vias; each step performs a single frontier expansion of the active
/// subpath. Nodes on a solved path are claimed exclusively.
pub struct PathingSolver {
    state: SolverState,
    max_iterations: u64,
    hyper: HyperParameters,
    strategy: Box<dyn CostStrategy>,
    layer_count: usize,
    mesh: CapacityMesh,
    graph: UnGraphMap<NodeId, ()>,
    edges: Vec<MeshEdge>,
    used: HashSet<NodeId>,
    unprocessed: VecDeque<ConnectionPair>,
    solved_routes: Vec<ConnectionPath>,
    active_pair: Option<ConnectionPair>,
    subpaths: Option<VecDeque<Subpath>>,
    solved_subpaths: Vec<Subpath>,
    active_subpath: Option<Subpath>,
    via_nodes: Vec<NodeId>,
    /// Closest available via per remaining connection, keyed by name;
    /// recomputed whenever a new pair becomes active so one connection
    /// cannot steal a via another one depends on.
    closest_via_for_start: HashMap<String, NodeId>,
    closest_via_for_end: HashMap<String, NodeId>,
    /// Directive vias of the active pair, kept for diagnostics.
    directive_vias: Option<(NodeId, NodeId)>,
    frontier: Frontier,
}

impl std::fmt::Debug for PathingSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathingSolver")
            .field("state", &self.state)
            .field("max_iterations", &self.max_iterations)
            .field("hyper", &self.hyper)
            .field("layer_count", &self.layer_count)
            .field("edges", &self.edges)
            .field("used", &self.used)
            .field("unprocessed", &self.unprocessed)
            .field("solved_routes", &self.solved_routes)
            .field("active_pair", &self.active_pair)
            .field("subpaths", &self.subpaths)
            .field("solved_subpaths", &self.solved_subpaths)
            .field("active_subpath", &self.active_subpath)
            .field("via_nodes", &self.via_nodes)
            .field("closest_via_for_start", &self.closest_via_for_start)
            .field("closest_via_for_end", &self.closest_via_for_end)
            .field("directive_vias", &self.directive_vias)
            .field("frontier", &self.frontier)
            .finish()
    }
}

impl PathingSolver {
    pub fn new(params: PathingParams) -> Result<Self, SolverError> {
        Self::with_strategy(params, Box::new(EuclideanCosts))
    }

    pub fn with_strategy(
        params: PathingParams,
        strategy: Box<dyn CostStrategy>,
    ) -> Result<Self, SolverError> {
        let PathingParams {
            mesh,
            edges,
            connections,
            layer_count,
            hyper,
            max_iterations,
        } = params;

        let graph = adjacency(&edges);

        let target_nodes: Vec<NodeId> = mesh
            .finished_nodes()
            .filter(|node| node.contains_target)
            .map(|node| node.id)
            .collect();

        let mut pairs = Vec::with_capacity(connections.len());
        for connection in connections {
            let (Some(first), Some(last)) =
                (connection.points.first(), connection.points.last())
            else {
                continue;
            };
            let first_z = layer_name_to_z(&first.layer, layer_count).unwrap_or(0);
            let start = resolve_endpoint(&mesh, &target_nodes, first.x, first.y, first_z)
                .ok_or_else(|| SolverError::UnresolvedEndpoint {
                    connection: connection.name.clone(),
                    x: first.x,
                    y: first.y,
                    layer: first_z,
                })?;
            let last_z = layer_name_to_z(&last.layer, layer_count).unwrap_or(0);
            let end = resolve_endpoint(&mesh, &target_nodes, last.x, last.y, last_z)
                .ok_or_else(|| SolverError::UnresolvedEndpoint {
                    connection: connection.name.clone(),
                    x: last.x,
                    y: last.y,
                    layer: last_z,
                })?;
            pairs.push(ConnectionPair {
                start,
                end,
                connection,
            });
        }

        let mut rng = StdRng::seed_from_u64(hyper.shuffle_seed);
        pairs.shuffle(&mut rng);

        let via_nodes = mesh
            .finished_nodes()
            .filter(|node| node.is_multi_layer())
            .map(|node| node.id)
            .collect();

        Ok(PathingSolver {
            state: SolverState::default(),
            max_iterations,
            hyper,
            strategy,
            layer_count,
            mesh,
            graph,
            edges,
            used: HashSet::new(),
            unprocessed: VecDeque::from(pairs),
            solved_routes: Vec::new(),
            active_pair: None,
            subpaths: None,
            solved_subpaths: Vec::new(),
            active_subpath: None,
            via_nodes,
            closest_via_for_start: HashMap::new(),
            closest_via_for_end: HashMap::new(),
            directive_vias: None,
            frontier: Frontier::new(),
        })
    }

    pub fn routes(&self) -> &[ConnectionPath] {
        &self.solved_routes
    }

    pub fn into_routes(self) -> Vec<ConnectionPath> {
        assert!(
            self.state.solved,
            "routes requested before the pathing solver solved"
        );
        self.solved_routes
    }

    pub fn mesh(&self) -> &CapacityMesh {
        &self.mesh
    }

    pub fn is_node_used(&self, id: NodeId) -> bool {
        self.used.contains(&id)
    }

    fn dist(&self, a: NodeId, b: NodeId) -> f64 {
        self.mesh
            .node(a)
            .rect
            .center
            .distance(&self.mesh.node(b).rect.center)
    }

    fn via_is_open(&self, id: NodeId) -> bool {
        let node = self.mesh.node(id);
        !node.completely_inside_obstacle
            && !node.contains_obstacle
            && !self.used.contains(&id)
    }

    /// Reserves the closest open via for the start and end of every
    /// remaining connection.
    fn compute_closest_vias(&mut self) {
        self.closest_via_for_start.clear();
        self.closest_via_for_end.clear();

        let open_vias: Vec<NodeId> = self
            .via_nodes
            .iter()
            .copied()
            .filter(|id| self.via_is_open(*id))
            .collect();
        if open_vias.is_empty() {
            return;
        }

        for pair in &self.unprocessed {
            let closest_to_start = open_vias
                .iter()
                .copied()
                .min_by(|a, b| {
                    self.dist(*a, pair.start).total_cmp(&self.dist(*b, pair.start))
                })
                .unwrap();
            let closest_to_end = open_vias
                .iter()
                .copied()
                .min_by(|a, b| self.dist(*a, pair.end).total_cmp(&self.dist(*b, pair.end)))
                .unwrap();
            self.closest_via_for_start
                .insert(pair.connection.name.clone(), closest_to_start);
            self.closest_via_for_end
                .insert(pair.connection.name.clone(), closest_to_end);
        }
    }

    /// Vias reserved for connections other than the active one.
    fn reserved_vias(&self) -> HashSet<NodeId> {
        let active = self
            .active_pair
            .as_ref()
            .map(|pair| pair.connection.name.as_str());
        self.closest_via_for_start
            .iter()
            .chain(self.closest_via_for_end.iter())
            .filter(|(name, _)| Some(name.as_str()) != active)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Closest via to `origin`, honoring reservations with a staged
    /// fallback: reservations are dropped first, and with nothing open at
    /// all the origin itself is returned.
    fn closest_via(&self, origin: NodeId, rng: &mut StdRng) -> NodeId {
        if self.via_nodes.is_empty() {
            return origin;
        }
        let reserved = self.reserved_vias();

        let mut candidates: Vec<NodeId> = self
            .via_nodes
            .iter()
            .copied()
            .filter(|id| self.via_is_open(*id))
            .filter(|id| !reserved.contains(id))
            .collect();

        if candidates.is_empty() {
            let mut fallback: Vec<NodeId> = self
                .via_nodes
                .iter()
                .copied()
                .filter(|id| self.via_is_open(*id))
                .collect();
            if fallback.is_empty() {
                return origin;
            }
            fallback.sort_by(|a, b| self.dist(*a, origin).total_cmp(&self.dist(*b, origin)));
            return fallback[0];
        }

        candidates.sort_by(|a, b| self.dist(*a, origin).total_cmp(&self.dist(*b, origin)));

        let max_skip = self.hyper.max_closest_via_skip;
        if max_skip > 0 && candidates.len() > 1 {
            let k = rng.gen_range(0..=max_skip) as usize;
            return candidates[k.min(candidates.len() - 1)];
        }
        candidates[0]
    }

    /// Second directive via, preferring one far enough from the first and
    /// close to the goal. Fallback drops the reservation filter, then the
    /// distance minimum, then settles for the closest via.
    fn far_via(&self, closest: NodeId, end: NodeId, rng: &mut StdRng) -> NodeId {
        if self.via_nodes.is_empty() {
            return closest;
        }
        let min_distance = self.hyper.far_via_min_distance;
        let reserved = self.reserved_vias();

        let mut viable: Vec<NodeId> = self
            .via_nodes
            .iter()
            .copied()
            .filter(|id| *id != closest && self.via_is_open(*id))
            .filter(|id| !reserved.contains(id))
            .filter(|id| self.dist(*id, closest) >= min_distance)
            .collect();

        if viable.is_empty() {
            let mut fallback: Vec<NodeId> = self
                .via_nodes
                .iter()
                .copied()
                .filter(|id| *id != closest && self.via_is_open(*id))
                .filter(|id| self.dist(*id, closest) >= min_distance)
                .collect();
            fallback.sort_by(|a, b| self.dist(*a, end).total_cmp(&self.dist(*b, end)));
            if let Some(first) = fallback.first() {
                return *first;
            }

            let mut last_resort: Vec<NodeId> = self
                .via_nodes
                .iter()
                .copied()
                .filter(|id| *id != closest && self.via_is_open(*id))
                .collect();
            last_resort.sort_by(|a, b| self.dist(*a, end).total_cmp(&self.dist(*b, end)));
            return last_resort.first().copied().unwrap_or(closest);
        }

        viable.sort_by(|a, b| self.dist(*a, end).total_cmp(&self.dist(*b, end)));

        let max_skip = self.hyper.max_furthest_via_skip;
        if max_skip > 0 && viable.len() > 1 {
            let k = rng.gen_range(0..=max_skip) as usize;
            return viable[k.min(viable.len() - 1)];
        }
        viable[0]
    }

    /// Splits the active pair into layer-designated subpaths. A seeded
    /// chance decides whether the route is forced through directive vias;
    /// otherwise the whole connection stays on the start node's layer.
    fn build_subpaths(&mut self, pair: &ConnectionPair) -> VecDeque<Subpath> {
        let start_node = self.mesh.node(pair.start);
        let end_node = self.mesh.node(pair.end);
        let start_layer = start_node.available_z.first().copied().unwrap_or(0);
        let end_layer = end_node.available_z.first().copied().unwrap_or(0);

        let decision_seed = self
            .hyper
            .directive_seed
            .wrapping_add(self.solved_routes.len() as u64);
        let force_via_travel = seeded_decision(
            &[self.hyper.directive_seed, self.solved_routes.len() as u64],
            self.hyper.force_via_travel_chance,
        );

        if !force_via_travel {
            return VecDeque::from(vec![Subpath {
                start: pair.start,
                end: pair.end,
                layer: start_layer,
                solved: false,
                path: None,
            }]);
        }

        let mut closest_rng = StdRng::seed_from_u64(decision_seed);
        let closest = self.closest_via(pair.start, &mut closest_rng);
        let mut far_rng = StdRng::seed_from_u64(decision_seed.wrapping_add(1000));
        let far = self.far_via(closest, pair.end, &mut far_rng);
        self.directive_vias = Some((closest, far));

        let middle_layer = (0..self.layer_count)
            .find(|z| *z != start_layer)
            .unwrap_or(start_layer);

        let mut subpaths = VecDeque::new();
        subpaths.push_back(Subpath {
            start: pair.start,
            end: closest,
            layer: start_layer,
            solved: false,
            path: None,
        });
        if start_layer == end_layer {
            subpaths.push_back(Subpath {
                start: closest,
                end: far,
                layer: middle_layer,
                solved: false,
                path: None,
            });
            subpaths.push_back(Subpath {
                start: far,
                end: pair.end,
                layer: end_layer,
                solved: false,
                path: None,
            });
        } else {
            subpaths.push_back(Subpath {
                start: closest,
                end: pair.end,
                layer: end_layer,
                solved: false,
                path: None,
            });
        }
        subpaths
    }

    /// One frontier expansion of the active subpath.
    fn step_solve_subpath(&mut self, subpath: &mut Subpath) {
        // Trivial zero-length leg.
        if subpath.start == subpath.end {
            subpath.path = Some(vec![subpath.start]);
            subpath.solved = true;
            self.used.insert(subpath.start);
            return;
        }

        if self.frontier.is_fresh() {
            let h = self.dist(subpath.start, subpath.end);
            self.frontier.push_improving(Candidate {
                node: subpath.start,
                prev: None,
                g: 0.0,
                h,
                f: self.hyper.greedy_multiplier * h,
            });
        }

        let Some(current_index) = self.frontier.pop_best() else {
            let connection = self
                .active_pair
                .as_ref()
                .map(|pair| pair.connection.name.clone())
                .unwrap_or_default();
            self.state.fail(SolverError::NoViableCandidates { connection });
            return;
        };
        let current = *self.frontier.candidate(current_index);
        self.frontier.mark_visited(current.node);

        if current.node == subpath.end {
            let path = self.frontier.backtrack(current_index);
            for node in &path {
                self.used.insert(*node);
            }
            subpath.path = Some(path);
            subpath.solved = true;
            return;
        }

        let goal = subpath.end;
        let neighbors: Vec<NodeId> = self.graph.neighbors(current.node).collect();
        for neighbor in neighbors {
            if self.frontier.is_visited(neighbor) {
                continue;
            }
            let node = self.mesh.node(neighbor);
            let is_goal = neighbor == goal;
            if !is_goal {
                if node.contains_obstacle {
                    continue;
                }
                // Target nodes belong to their own connections.
                if node.contains_target {
                    continue;
                }
                if !self
                    .strategy
                    .node_has_capacity(node, self.used.contains(&neighbor))
                {
                    continue;
                }
                // The goal bypasses every filter, so a connection can
                // change layers at its destination.
                if !node.has_layer(subpath.layer) {
                    continue;
                }
            }

            let goal_node = self.mesh.node(goal);
            let expansion =
                Expansion::new(&self.frontier, &self.mesh, current_index, node, goal_node);
            let g = self.strategy.compute_g(&expansion);
            let h = self.strategy.compute_h(&expansion);
            let f = g + self.hyper.greedy_multiplier * h;
            self.frontier.push_improving(Candidate {
                node: neighbor,
                prev: Some(current_index),
                g,
                h,
                f,
            });
        }
    }

    /// Concatenates solved subpaths into the connection's full node path,
    /// dropping the duplicated boundary node between consecutive legs.
    fn assemble_route(&self, pair: &ConnectionPair) -> ConnectionPath {
        let mut nodes: Vec<NodeId> = Vec::new();
        for (index, subpath) in self.solved_subpaths.iter().enumerate() {
            match &subpath.path {
                Some(path) => {
                    if index == 0 {
                        nodes.extend_from_slice(path);
                    } else {
                        // The leg's first node duplicates the previous
                        // leg's last node.
                        nodes.extend(path.iter().skip(1));
                    }
                }
                None => {
                    if index == 0 {
                        nodes.push(subpath.start);
                    }
                    if index + 1 == self.solved_subpaths.len() {
                        nodes.push(subpath.end);
                    }
                }
            }
        }
        ConnectionPath {
            connection: pair.connection.clone(),
            nodes,
        }
    }
}

/// Minimal-standard LCG sample in `[0, 1)` against `chance`. A combined
/// seed of zero samples below every positive chance.
fn seeded_decision(seeds: &[u64], chance: f64) -> bool {
    const MODULUS: u64 = 2_147_483_647;
    const MULTIPLIER: u64 = 16_807;
    let combined = seeds.iter().fold(0u64, |acc, seed| {
        acc.wrapping_add(seed.wrapping_mul(MULTIPLIER) % MODULUS)
    });
    let next = (combined % MODULUS).wrapping_mul(MULTIPLIER) % MODULUS;
    (next as f64 - 1.0) / ((MODULUS - 1) as f64) < chance
}

fn resolve_endpoint(
    mesh: &CapacityMesh,
    target_nodes: &[NodeId],
    x: f64,
    y: f64,
    z: usize,
) -> Option<NodeId> {
    use crate::geometry::{BoundingBox, Point};
    let point = Point::new(x, y);
    target_nodes
        .iter()
        .copied()
        .filter(|id| mesh.node(*id).has_layer(z))
        .find(|id| {
            let node = mesh.node(*id);
            node.rect.center.distance(&point) < node.rect.width / 2.0
        })
        .or_else(|| {
            // The distance heuristic misses endpoints sitting at a tile
            // corner; rect containment catches those.
            target_nodes
                .iter()
                .copied()
                .filter(|id| mesh.node(*id).has_layer(z))
                .find(|id| mesh.node(*id).rect.contains_point(&point))
        })
}

impl Solver for PathingSolver {
    fn name(&self) -> &'static str {
        "capacity_pathing"
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
        if self.active_pair.is_none() {
            let Some(pair) = self.unprocessed.pop_front() else {
                tracing::info!(routes = self.solved_routes.len(), "all connections processed");
                self.state.finish();
                return;
            };
            self.active_pair = Some(pair);
            self.compute_closest_vias();
            return;
        }

        if self.subpaths.is_none() {
            let pair = self.active_pair.clone().expect("active pair present");
            let subpaths = self.build_subpaths(&pair);
            self.subpaths = Some(subpaths);
            self.solved_subpaths.clear();
            return;
        }

        if self.active_subpath.is_none() {
            let next = self
                .subpaths
                .as_mut()
                .and_then(|subpaths| subpaths.pop_front());
            match next {
                Some(subpath) => {
                    self.active_subpath = Some(subpath);
                }
                None => {
                    let pair = self.active_pair.take().expect("active pair present");
                    let route = self.assemble_route(&pair);
                    tracing::debug!(
                        connection = %route.connection.name,
                        nodes = route.nodes.len(),
                        "connection solved"
                    );
                    self.solved_routes.push(route);
                    self.subpaths = None;
                    self.solved_subpaths.clear();
                    self.directive_vias = None;
                }
            }
            return;
        }

        let mut subpath = self.active_subpath.take().expect("active subpath present");
        self.step_solve_subpath(&mut subpath);
        if self.state.failed {
            return;
        }
        if subpath.solved {
            self.solved_subpaths.push(subpath);
            self.frontier.clear();
        } else {
            self.active_subpath = Some(subpath);
        }
    }

    fn visualize(&self) -> Scene {
        let mut scene = Scene::titled("capacity pathing");

        for node in self.mesh.finished_nodes() {
            let fill = if node.contains_target {
                "rgba(0, 150, 255, 0.15)"
            } else if node.contains_obstacle {
                "rgba(255, 0, 0, 0.1)"
            } else if self.used.contains(&node.id) {
                "rgba(255, 165, 0, 0.2)"
            } else {
                "rgba(200, 200, 200, 0.05)"
            };
            scene.rects.push(RectMark {
                center: node.rect.center,
                width: node.rect.width,
                height: node.rect.height,
                fill: Some(fill.to_string()),
                stroke: None,
                label: None,
                layer: Some(crate::viz::layer_tag(&node.available_z)),
            });
        }

        for edge in &self.edges {
            scene.lines.push(Line {
                points: vec![
                    self.mesh.node(edge.nodes[0]).rect.center,
                    self.mesh.node(edge.nodes[1]).rect.center,
                ],
                stroke: Some("rgba(150, 150, 150, 0.2)".to_string()),
                dash: None,
            });
        }

        for route in &self.solved_routes {
            let points = route
                .nodes
                .iter()
                .map(|id| self.mesh.node(*id).rect.center)
                .collect();
            scene.lines.push(Line {
                points,
                stroke: Some("blue".to_string()),
                dash: None,
            });
            if let (Some(first), Some(last)) = (route.nodes.first(), route.nodes.last()) {
                scene.points.push(PointMark {
                    position: self.mesh.node(*first).rect.center,
                    color: None,
                    label: Some(format!("START: {}", route.connection.name)),
                });
                scene.points.push(PointMark {
                    position: self.mesh.node(*last).rect.center,
                    color: None,
                    label: Some(format!("END: {}", route.connection.name)),
                });
            }
        }

        if let Some(pair) = &self.active_pair {
            scene.lines.push(Line {
                points: vec![
                    self.mesh.node(pair.start).rect.center,
                    self.mesh.node(pair.end).rect.center,
                ],
                stroke: Some("cyan".to_string()),
                dash: Some("20 5".to_string()),
            });
        }

        if let Some((closest, far)) = self.directive_vias {
            for (id, stroke) in [(closest, "blue"), (far, "purple")] {
                let node = self.mesh.node(id);
                scene.circles.push(CircleMark {
                    center: node.rect.center,
                    radius: node.rect.width.max(node.rect.height),
                    fill: None,
                    stroke: Some(stroke.to_string()),
                    label: None,
                });
            }
        }

        for candidate in self.frontier.candidates() {
            if self.frontier.is_visited(candidate.node) {
                continue;
            }
            scene.circles.push(CircleMark {
                center: self.mesh.node(candidate.node).rect.center,
                radius: 0.05,
                fill: Some("rgba(255, 255, 0, 0.6)".to_string()),
                stroke: Some("yellow".to_string()),
                label: None,
            });
        }

        scene
    }
}

impl Supervised for PathingSolver {
    fn completion_ratio(&self) -> f64 {
        let total = self.unprocessed.len()
            + self.solved_routes.len()
            + usize::from(self.active_pair.is_some());
        if total == 0 {
            return 1.0;
        }
        self.solved_routes.len() as f64 / total as f64
    }
}
