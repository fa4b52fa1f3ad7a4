use rstar::{RTree, RTreeObject};

use crate::board::{layer_name_to_z, BoardDescription, ObstacleId};
use crate::geometry::{rect_inside_polygon, rect_overlaps_polygon, BoundingBox, Point, Rect};
use crate::solver::{Solver, SolverState};
use crate::viz::{layer_tag, RectMark, Scene};

use super::node::{CapacityMesh, MeshNode, NodeId};

/// Subdivision policy. `AssignableVias` is used by pipelines where vias
/// are forbidden outside designated obstacles: every multi-layer region is
/// split per layer, and each assignable obstacle collapses into a single
/// traversable multi-layer node once subdivision finishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MeshMode {
    Standard,
    AssignableVias,
}

#[derive(Clone, Debug)]
pub struct MeshOptions {
    /// Maximum XY subdivision depth; derived from the board extent and
    /// minimum trace width when not set.
    pub capacity_depth: Option<u32>,
    /// Single-layer nodes wider or taller than this keep subdividing.
    pub max_single_layer_size: f64,
    pub via_diameter: f64,
    pub obstacle_margin: f64,
    /// Single-layer nodes whose obstacle coverage exceeds this fraction
    /// are dropped unless they contain a target.
    pub obstacle_coverage_limit: f64,
    pub max_iterations: u64,
}

impl Default for MeshOptions {
    fn default() -> Self {
        MeshOptions {
            capacity_depth: None,
            max_single_layer_size: 2.0,
            via_diameter: 0.6,
            obstacle_margin: 0.1,
            obstacle_coverage_limit: 0.75,
            max_iterations: 100_000,
        }
    }
}

#[derive(Clone, Debug)]
struct IndexedObstacle {
    id: ObstacleId,
    rect: Rect,
    zs: Vec<usize>,
    assignable: bool,
}

impl RTreeObject for IndexedObstacle {
    type Envelope = rstar::AABB<Point>;

    fn envelope(&self) -> Self::Envelope {
        self.rect.envelope()
    }
}

#[derive(Clone, Debug)]
struct Target {
    point: Point,
    z: usize,
    connection: String,
}

/// Recursively subdivides the board into capacity mesh nodes.
///
/// One step pops a node off the unfinished stack and either quarters it in
/// XY, splits it per layer in Z, finishes it, or drops it. The builder is
/// solved once the stack drains (after the assignable merge pass, when
/// that mode is active).
pub struct MeshBuilder {
    state: SolverState,
    mode: MeshMode,
    opts: MeshOptions,
    max_depth: u32,
    layer_count: usize,
    bounds: Rect,
    outline: Option<Vec<Point>>,
    obstacle_tree: RTree<IndexedObstacle>,
    targets: Vec<Target>,
    nodes: Vec<MeshNode>,
    unfinished: Vec<NodeId>,
    finished: Vec<NodeId>,
}

impl MeshBuilder {
    pub fn new(board: &BoardDescription, mode: MeshMode, opts: MeshOptions) -> Self {
        let mut opts = opts;
        if let Some(diameter) = board.min_via_diameter {
            opts.via_diameter = diameter;
        }
        let layer_count = board.layer_count.max(1);
        let bounds = board.bounds.as_rect();
        let max_depth = opts
            .capacity_depth
            .unwrap_or_else(|| default_depth(&bounds, board.min_trace_width));

        let obstacle_tree = RTree::bulk_load(
            board
                .obstacles
                .iter()
                .enumerate()
                .map(|(index, obstacle)| IndexedObstacle {
                    id: ObstacleId(index as u32),
                    rect: obstacle.rect,
                    zs: obstacle.available_z(layer_count),
                    assignable: obstacle.net_is_assignable,
                })
                .collect(),
        );

        let targets = board
            .connections
            .iter()
            .flat_map(|connection| {
                connection.points.iter().map(|point| Target {
                    point: point.as_point(),
                    z: layer_name_to_z(&point.layer, layer_count).unwrap_or(0),
                    connection: connection.name.clone(),
                })
            })
            .collect();

        let mut builder = MeshBuilder {
            state: SolverState::default(),
            mode,
            opts,
            max_depth,
            layer_count,
            bounds,
            outline: board.outline.clone(),
            obstacle_tree,
            targets,
            nodes: Vec::new(),
            unfinished: Vec::new(),
            finished: Vec::new(),
        };

        let root = builder.alloc_node(bounds, (0..layer_count).collect(), 0, None);
        builder.unfinished.push(root);
        builder
    }

    /// Runs the builder to completion and returns the mesh. Fails only on
    /// budget exhaustion.
    pub fn build(board: &BoardDescription, mode: MeshMode, opts: MeshOptions) -> CapacityMesh {
        let mut builder = MeshBuilder::new(board, mode, opts);
        builder
            .solve()
            .expect("mesh subdivision exceeded its iteration budget");
        builder.into_mesh()
    }

    pub fn into_mesh(self) -> CapacityMesh {
        assert!(self.state.solved, "mesh requested before builder solved");
        CapacityMesh {
            nodes: self.nodes,
            finished: self.finished,
        }
    }

    fn alloc_node(
        &mut self,
        rect: Rect,
        available_z: Vec<usize>,
        depth: u32,
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let overlapping = self.overlapping_obstacles(&rect, &available_z);
        let contains_obstacle = !overlapping.is_empty() || self.partially_outside(&rect);
        let completely_inside_obstacle = contains_obstacle
            && overlapping
                .iter()
                .any(|obstacle| obstacle.rect.contains_bounds(&rect));
        let target = self
            .targets
            .iter()
            .find(|target| rect.contains_point(&target.point) && available_z.contains(&target.z));

        self.nodes.push(MeshNode {
            id,
            rect,
            available_z,
            depth,
            parent,
            contains_obstacle,
            completely_inside_obstacle,
            contains_target: target.is_some(),
            target_connection: target.map(|t| t.connection.clone()),
            assigned_obstacle: None,
        });
        id
    }

    fn overlapping_obstacles(&self, rect: &Rect, available_z: &[usize]) -> Vec<&IndexedObstacle> {
        self.obstacle_tree
            .locate_in_envelope_intersecting(&rect.envelope())
            .filter(|obstacle| rect.overlap_area(&obstacle.rect) > 0.0)
            .filter(|obstacle| obstacle.zs.iter().any(|z| available_z.contains(z)))
            .collect()
    }

    fn completely_outside(&self, rect: &Rect) -> bool {
        if !self.bounds.overlaps(rect) {
            return true;
        }
        match &self.outline {
            Some(polygon) => !rect_overlaps_polygon(rect, polygon),
            None => false,
        }
    }

    fn partially_outside(&self, rect: &Rect) -> bool {
        // Tolerance keeps exact-tiling children from being flagged by
        // floating-point noise.
        const EPS: f64 = 1e-9;
        let tl = rect.top_left();
        let br = rect.bottom_right();
        let btl = self.bounds.top_left();
        let bbr = self.bounds.bottom_right();
        if tl.x < btl.x - EPS || br.x > bbr.x + EPS || tl.y < btl.y - EPS || br.y > bbr.y + EPS {
            return true;
        }
        match &self.outline {
            Some(polygon) => {
                !rect_overlaps_polygon(rect, polygon) || !rect_inside_polygon(rect, polygon)
            }
            None => false,
        }
    }

    /// Fraction of the node area covered by obstacles on its layers,
    /// clamped to one. Overlapping obstacles may double-count; the value
    /// is only compared against the coverage limit.
    fn obstacle_coverage(&self, node: &MeshNode) -> f64 {
        let area = node.rect.area();
        if area <= 0.0 {
            return 1.0;
        }
        let covered: f64 = self
            .overlapping_obstacles(&node.rect, &node.available_z)
            .iter()
            .map(|obstacle| node.rect.overlap_area(&obstacle.rect))
            .sum();
        (covered / area).min(1.0)
    }

    fn overlaps_assignable_obstacle(&self, node: &MeshNode) -> bool {
        self.overlapping_obstacles(&node.rect, &node.available_z)
            .iter()
            .any(|obstacle| obstacle.assignable)
    }

    fn should_xy_subdivide(&self, node: &MeshNode) -> bool {
        if node.depth >= self.max_depth {
            return false;
        }
        if node.contains_target {
            return true;
        }
        if node.contains_obstacle && !node.completely_inside_obstacle {
            return true;
        }
        node.available_z.len() == 1
            && (node.rect.width > self.opts.max_single_layer_size
                || node.rect.height > self.opts.max_single_layer_size)
    }

    fn should_z_subdivide(&self, node: &MeshNode) -> bool {
        if !node.is_multi_layer() {
            return false;
        }
        match self.mode {
            MeshMode::AssignableVias => true,
            MeshMode::Standard => {
                node.contains_obstacle
                    || node.rect.width < self.opts.via_diameter + self.opts.obstacle_margin
            }
        }
    }

    /// Whether a node that would otherwise finish must be dropped for its
    /// obstacle content. Target nodes are exempted by the caller.
    fn filtered_for_obstacle(&self, node: &MeshNode) -> bool {
        if !node.contains_obstacle {
            return false;
        }
        if self.mode == MeshMode::AssignableVias && self.overlaps_assignable_obstacle(node) {
            // Kept traversable for now; the merge pass removes it later.
            return false;
        }
        if self.partially_outside(&node.rect) {
            return true;
        }
        if node.available_z.len() == 1 {
            return self.obstacle_coverage(node) > self.opts.obstacle_coverage_limit;
        }
        true
    }

    fn finish_node(&mut self, id: NodeId, clear_obstacle_flag: bool) {
        if clear_obstacle_flag {
            let node = &mut self.nodes[id];
            node.contains_obstacle = false;
            node.completely_inside_obstacle = false;
        }
        self.finished.push(id);
    }

    fn xy_subdivide(&mut self, id: NodeId) {
        let parent = self.nodes[id].clone();
        let half_w = parent.rect.width / 2.0;
        let half_h = parent.rect.height / 2.0;
        let offsets = [(-0.5, -0.5), (0.5, -0.5), (-0.5, 0.5), (0.5, 0.5)];
        for (ox, oy) in offsets {
            let child_rect = Rect::new(
                Point {
                    x: parent.rect.center.x + ox * half_w,
                    y: parent.rect.center.y + oy * half_h,
                },
                half_w,
                half_h,
            );
            if self.completely_outside(&child_rect) {
                continue;
            }
            let child = self.alloc_node(
                child_rect,
                parent.available_z.clone(),
                parent.depth + 1,
                Some(id),
            );
            self.unfinished.push(child);
        }
    }

    fn z_subdivide(&mut self, id: NodeId) {
        let parent = self.nodes[id].clone();
        if self.completely_outside(&parent.rect) {
            return;
        }
        for z in 0..self.layer_count {
            // Z splits share the parent rect and do not deepen the tree.
            let child = self.alloc_node(parent.rect, vec![z], parent.depth, Some(id));
            let child_node = self.nodes[child].clone();
            if self.should_xy_subdivide(&child_node) {
                self.unfinished.push(child);
            } else if child_node.contains_target {
                self.finish_node(child, false);
            } else if !self.filtered_for_obstacle(&child_node) {
                self.finish_node(child, true);
            }
        }
    }

    /// Replaces every finished node overlapping an assignable obstacle
    /// with one multi-layer traversable node per obstacle, sized to the
    /// union of the obstacle and the removed nodes.
    fn insert_assignable_obstacle_nodes(&mut self) {
        let assignables: Vec<IndexedObstacle> = self
            .obstacle_tree
            .iter()
            .filter(|obstacle| obstacle.assignable)
            .cloned()
            .collect();
        if assignables.is_empty() {
            return;
        }

        let mut removed: Vec<NodeId> = Vec::new();
        let mut merged: Vec<(ObstacleId, Rect)> = Vec::new();

        for obstacle in &assignables {
            let mut union = obstacle.rect;
            for id in &self.finished {
                let node = &self.nodes[*id];
                if node.rect.overlap_area(&obstacle.rect) > 0.0
                    && obstacle.zs.iter().any(|z| node.available_z.contains(z))
                {
                    union = union.union(&node.rect);
                    removed.push(*id);
                }
            }
            merged.push((obstacle.id, union));
        }

        self.finished.retain(|id| !removed.contains(id));

        for (obstacle_id, rect) in merged {
            let available_z: Vec<usize> = (0..self.layer_count).collect();
            let target = self
                .targets
                .iter()
                .find(|target| rect.contains_point(&target.point))
                .cloned();
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(MeshNode {
                id,
                rect,
                available_z,
                depth: 0,
                parent: None,
                contains_obstacle: false,
                completely_inside_obstacle: false,
                contains_target: target.is_some(),
                target_connection: target.map(|t| t.connection),
                assigned_obstacle: Some(obstacle_id),
            });
            self.finished.push(id);
        }
    }
}

fn default_depth(bounds: &Rect, min_trace_width: f64) -> u32 {
    let mut extent = bounds.width.max(bounds.height);
    let floor = (min_trace_width * 4.0).max(f64::EPSILON);
    let mut depth = 0;
    while extent > floor && depth < 9 {
        extent /= 2.0;
        depth += 1;
    }
    depth.max(2)
}

impl Solver for MeshBuilder {
    fn name(&self) -> &'static str {
        "capacity_mesh"
    }

    fn state(&self) -> &SolverState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SolverState {
        &mut self.state
    }

    fn max_iterations(&self) -> u64 {
        self.opts.max_iterations
    }

    fn step_once(&mut self) {
        let Some(id) = self.unfinished.pop() else {
            if self.mode == MeshMode::AssignableVias {
                self.insert_assignable_obstacle_nodes();
            }
            tracing::debug!(
                finished = self.finished.len(),
                arena = self.nodes.len(),
                "mesh subdivision complete"
            );
            self.state.finish();
            return;
        };

        let node = self.nodes[id].clone();
        if self.should_xy_subdivide(&node) {
            self.xy_subdivide(id);
        } else if self.should_z_subdivide(&node) {
            self.z_subdivide(id);
        } else if node.contains_target {
            self.finish_node(id, false);
        } else if !self.filtered_for_obstacle(&node) {
            self.finish_node(id, false);
        }
    }

    fn visualize(&self) -> Scene {
        let mut scene = Scene::titled("capacity mesh");
        for id in &self.finished {
            let node = &self.nodes[*id];
            let fill = if node.contains_target {
                "rgba(0, 150, 255, 0.15)"
            } else if node.contains_obstacle {
                "rgba(255, 0, 0, 0.1)"
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
                layer: Some(layer_tag(&node.available_z)),
            });
        }
        for id in &self.unfinished {
            let node = &self.nodes[*id];
            scene.rects.push(RectMark {
                center: node.rect.center,
                width: node.rect.width,
                height: node.rect.height,
                fill: None,
                stroke: Some("rgba(128, 128, 128, 0.4)".to_string()),
                label: None,
                layer: Some(layer_tag(&node.available_z)),
            });
        }
        scene
    }
}
