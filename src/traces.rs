//! Routed output: per-connection wire/via segment lists derived from the
//! pathing solver's node paths.

use serde::{Deserialize, Serialize};

use crate::mesh::CapacityMesh;
use crate::pathing::ConnectionPath;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RouteSegment {
    Wire {
        x: f64,
        y: f64,
        width: f64,
        layer: usize,
    },
    Via {
        x: f64,
        y: f64,
        from_layer: usize,
        to_layer: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutedTrace {
    pub connection: String,
    pub route: Vec<RouteSegment>,
}

impl RoutedTrace {
    pub fn vias(&self) -> impl Iterator<Item = &RouteSegment> {
        self.route
            .iter()
            .filter(|segment| matches!(segment, RouteSegment::Via { .. }))
    }
}

pub fn vias_present(traces: &[RoutedTrace]) -> bool {
    traces.iter().any(|trace| trace.vias().next().is_some())
}

/// Converts node paths to wire segments at node centers, inserting a via
/// at the last multi-layer node whenever the path leaves its current
/// layer.
pub fn emit_traces(
    routes: &[ConnectionPath],
    mesh: &CapacityMesh,
    trace_width: f64,
) -> Vec<RoutedTrace> {
    routes
        .iter()
        .map(|route| {
            let mut segments = Vec::with_capacity(route.nodes.len());
            let mut current_z = route
                .nodes
                .first()
                .and_then(|id| mesh.node(*id).available_z.first().copied())
                .unwrap_or(0);
            let mut last_multi_layer: Option<crate::geometry::Point> = None;

            for id in &route.nodes {
                let node = mesh.node(*id);
                if !node.has_layer(current_z) {
                    let new_z = node.available_z.first().copied().unwrap_or(current_z);
                    let via_at = last_multi_layer.unwrap_or(node.rect.center);
                    segments.push(RouteSegment::Via {
                        x: via_at.x,
                        y: via_at.y,
                        from_layer: current_z,
                        to_layer: new_z,
                    });
                    current_z = new_z;
                }
                segments.push(RouteSegment::Wire {
                    x: node.rect.center.x,
                    y: node.rect.center.y,
                    width: trace_width,
                    layer: current_z,
                });
                if node.is_multi_layer() {
                    last_multi_layer = Some(node.rect.center);
                }
            }

            RoutedTrace {
                connection: route.connection.name.clone(),
                route: segments,
            }
        })
        .collect()
}
