//! Board description input types: the bounds, outline, obstacles and
//! connection requests consumed by the mesh and pathing solvers.

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect};

/// Index of an obstacle in its board description's obstacle list.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ObstacleId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.min_x + self.max_x) / 2.0,
            y: (self.min_y + self.max_y) / 2.0,
        }
    }

    pub fn as_rect(&self) -> Rect {
        Rect::new(self.center(), self.width(), self.height())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub rect: Rect,
    /// Layer names this obstacle occupies.
    pub layers: Vec<String>,
    /// Names of traces/nets already connected to this obstacle.
    #[serde(default)]
    pub connected_to: Vec<String>,
    /// Whether the obstacle may still absorb a via's net during
    /// reassignment.
    #[serde(default)]
    pub net_is_assignable: bool,
}

impl Obstacle {
    /// Z indices covered by this obstacle's layer names; unknown names are
    /// skipped.
    pub fn available_z(&self, layer_count: usize) -> Vec<usize> {
        let mut zs: Vec<usize> = self
            .layers
            .iter()
            .filter_map(|name| layer_name_to_z(name, layer_count))
            .collect();
        zs.sort_unstable();
        zs.dedup();
        zs
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPoint {
    pub x: f64,
    pub y: f64,
    pub layer: String,
}

impl ConnectionPoint {
    pub fn as_point(&self) -> Point {
        Point {
            x: self.x,
            y: self.y,
        }
    }
}

/// A named net with the ordered points it must connect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    pub points: Vec<ConnectionPoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardDescription {
    pub layer_count: usize,
    pub min_trace_width: f64,
    #[serde(default)]
    pub min_via_diameter: Option<f64>,
    pub bounds: Bounds,
    /// Optional outline polygon; when present, mesh nodes must overlap it.
    #[serde(default)]
    pub outline: Option<Vec<Point>>,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl BoardDescription {
    pub fn obstacle(&self, id: ObstacleId) -> &Obstacle {
        &self.obstacles[id.0 as usize]
    }

    pub fn obstacle_mut(&mut self, id: ObstacleId) -> &mut Obstacle {
        &mut self.obstacles[id.0 as usize]
    }
}

/// Maps a layer name to its z index: `top` is 0, `bottom` is the last
/// layer, `inner1`..`innerN` count down from the top.
pub fn layer_name_to_z(name: &str, layer_count: usize) -> Option<usize> {
    match name {
        "top" => Some(0),
        "bottom" => Some(layer_count.saturating_sub(1)),
        _ => {
            let index: usize = name.strip_prefix("inner")?.parse().ok()?;
            (index < layer_count).then_some(index)
        }
    }
}

pub fn z_to_layer_name(z: usize, layer_count: usize) -> String {
    if z == 0 {
        "top".to_string()
    } else if z + 1 == layer_count {
        "bottom".to_string()
    } else {
        format!("inner{z}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    #[test]
    fn layer_name_round_trip() {
        assert_eq!(layer_name_to_z("top", 2), Some(0));
        assert_eq!(layer_name_to_z("bottom", 2), Some(1));
        assert_eq!(layer_name_to_z("bottom", 4), Some(3));
        assert_eq!(layer_name_to_z("inner1", 4), Some(1));
        assert_eq!(layer_name_to_z("copper", 2), None);
        assert_eq!(z_to_layer_name(0, 2), "top");
        assert_eq!(z_to_layer_name(1, 2), "bottom");
        assert_eq!(z_to_layer_name(2, 4), "inner2");
    }

    #[test]
    fn board_description_survives_json() {
        let board = BoardDescription {
            layer_count: 2,
            min_trace_width: 0.15,
            min_via_diameter: Some(0.6),
            bounds: Bounds {
                min_x: 0.0,
                max_x: 10.0,
                min_y: 0.0,
                max_y: 10.0,
            },
            outline: Some(vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(5.0, 10.0),
            ]),
            obstacles: vec![Obstacle {
                rect: Rect::new(Point::new(5.0, 5.0), 2.0, 1.0),
                layers: vec!["top".into()],
                connected_to: vec!["net1".into()],
                net_is_assignable: true,
            }],
            connections: vec![Connection {
                name: "net1".into(),
                points: vec![ConnectionPoint {
                    x: 1.0,
                    y: 2.0,
                    layer: "top".into(),
                }],
            }],
        };

        let json = serde_json::to_string(&board).unwrap();
        let parsed: BoardDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, board);

        // Optional fields default when absent.
        let minimal: BoardDescription = serde_json::from_str(
            r#"{"layer_count":2,"min_trace_width":0.2,
                "bounds":{"min_x":0.0,"max_x":5.0,"min_y":0.0,"max_y":5.0}}"#,
        )
        .unwrap();
        assert_eq!(minimal.min_via_diameter, None);
        assert!(minimal.obstacles.is_empty());
        assert!(minimal.connections.is_empty());
    }

    #[test]
    fn obstacle_layer_set() {
        let obstacle = Obstacle {
            rect: Rect::new(Point::new(0.0, 0.0), 1.0, 1.0),
            layers: vec!["bottom".into(), "top".into(), "top".into()],
            connected_to: vec![],
            net_is_assignable: false,
        };
        assert_eq!(obstacle.available_z(2), vec![0, 1]);
    }
}
