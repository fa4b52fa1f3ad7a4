//! Diagnostic scene graph emitted by `Solver::visualize`. Consumed by
//! external rendering tooling only; nothing in the solvers reads it back.

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub title: Option<String>,
    pub lines: Vec<Line>,
    pub points: Vec<PointMark>,
    pub rects: Vec<RectMark>,
    pub circles: Vec<CircleMark>,
}

impl Scene {
    pub fn titled(title: impl Into<String>) -> Self {
        Scene {
            title: Some(title.into()),
            ..Scene::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub points: Vec<Point>,
    pub stroke: Option<String>,
    pub dash: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointMark {
    pub position: Point,
    pub color: Option<String>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RectMark {
    pub center: Point,
    pub width: f64,
    pub height: f64,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub label: Option<String>,
    /// Layer annotation such as `z0` or `z0,1`.
    pub layer: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CircleMark {
    pub center: Point,
    pub radius: f64,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub label: Option<String>,
}

/// Layer annotation for a set of z indices.
pub fn layer_tag(zs: &[usize]) -> String {
    let joined = zs
        .iter()
        .map(|z| z.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("z{joined}")
}
