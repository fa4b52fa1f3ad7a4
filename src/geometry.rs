use rstar::PointDistance;
use serde::{Deserialize, Serialize};

pub trait PointLike {
    fn x(&self) -> f64;
    fn y(&self) -> f64;

    fn as_point(&self) -> Point {
        Point {
            x: self.x(),
            y: self.y(),
        }
    }
}

pub trait BoundingBox {
    fn top_left(&self) -> Point;
    fn bottom_right(&self) -> Point;

    fn contains_point(&self, point: &Point) -> bool {
        let tl = self.top_left();
        let br = self.bottom_right();
        point.x >= tl.x && point.x <= br.x && point.y >= tl.y && point.y <= br.y
    }

    fn overlaps<B: BoundingBox>(&self, other: &B) -> bool {
        let tl = self.top_left();
        let br = self.bottom_right();
        let otl = other.top_left();
        let obr = other.bottom_right();
        tl.x <= obr.x && br.x >= otl.x && tl.y <= obr.y && br.y >= otl.y
    }

    fn contains_bounds<B: BoundingBox>(&self, other: &B) -> bool {
        let tl = self.top_left();
        let br = self.bottom_right();
        let otl = other.top_left();
        let obr = other.bottom_right();
        tl.x <= otl.x && br.x >= obr.x && tl.y <= otl.y && br.y >= obr.y
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl PointLike for Point {
    fn x(&self) -> f64 {
        self.x
    }

    fn y(&self) -> f64 {
        self.y
    }
}

impl rstar::Point for Point {
    type Scalar = f64;
    const DIMENSIONS: usize = 2;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        Point {
            x: generator(0),
            y: generator(1),
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        match index {
            0 => self.x,
            1 => self.y,
            _ => panic!("Index out of bounds"),
        }
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        match index {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => panic!("Index out of bounds"),
        }
    }
}

/// An axis-aligned rectangle described by its center and extent, the shape
/// shared by obstacles and mesh nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub center: Point,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(center: Point, width: f64, height: f64) -> Self {
        Rect {
            center,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn corners(&self) -> [Point; 4] {
        let tl = self.top_left();
        let br = self.bottom_right();
        [
            tl,
            Point { x: br.x, y: tl.y },
            br,
            Point { x: tl.x, y: br.y },
        ]
    }

    /// Area of the intersection with `other`, zero when disjoint.
    pub fn overlap_area(&self, other: &Rect) -> f64 {
        let tl = self.top_left();
        let br = self.bottom_right();
        let otl = other.top_left();
        let obr = other.bottom_right();
        let w = (br.x.min(obr.x) - tl.x.max(otl.x)).max(0.0);
        let h = (br.y.min(obr.y) - tl.y.max(otl.y)).max(0.0);
        w * h
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let tl = self.top_left();
        let br = self.bottom_right();
        let otl = other.top_left();
        let obr = other.bottom_right();
        let min_x = tl.x.min(otl.x);
        let min_y = tl.y.min(otl.y);
        let max_x = br.x.max(obr.x);
        let max_y = br.y.max(obr.y);
        Rect {
            center: Point {
                x: (min_x + max_x) / 2.0,
                y: (min_y + max_y) / 2.0,
            },
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }
}

impl BoundingBox for Rect {
    fn top_left(&self) -> Point {
        Point {
            x: self.center.x - self.width / 2.0,
            y: self.center.y - self.height / 2.0,
        }
    }

    fn bottom_right(&self) -> Point {
        Point {
            x: self.center.x + self.width / 2.0,
            y: self.center.y + self.height / 2.0,
        }
    }
}

impl rstar::RTreeObject for Rect {
    type Envelope = rstar::AABB<Point>;

    fn envelope(&self) -> Self::Envelope {
        rstar::AABB::from_corners(self.top_left(), self.bottom_right())
    }
}

impl PointDistance for Rect {
    fn distance_2(&self, point: &Point) -> f64 {
        let tl = self.top_left();
        let br = self.bottom_right();
        let dx = (tl.x - point.x).max(0.0).max(point.x - br.x);
        let dy = (tl.y - point.y).max(0.0).max(point.y - br.y);
        dx * dx + dy * dy
    }
}

fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let orient = |p: Point, q: Point, r: Point| -> f64 {
        (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
    };
    let on_segment = |p: Point, q: Point, r: Point| -> bool {
        q.x >= p.x.min(r.x) && q.x <= p.x.max(r.x) && q.y >= p.y.min(r.y) && q.y <= p.y.max(r.y)
    };

    let d1 = orient(a1, a2, b1);
    let d2 = orient(a1, a2, b2);
    let d3 = orient(b1, b2, a1);
    let d4 = orient(b1, b2, a2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(a1, b1, a2))
        || (d2 == 0.0 && on_segment(a1, b2, a2))
        || (d3 == 0.0 && on_segment(b1, a1, b2))
        || (d4 == 0.0 && on_segment(b1, a2, b2))
}

/// Ray-cast containment test; points on the boundary count as inside.
pub fn point_in_polygon(point: &Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    const EPSILON: f64 = 1e-6;
    for i in 0..polygon.len() {
        let start = polygon[i];
        let end = polygon[(i + 1) % polygon.len()];
        let seg_len = start.distance(&end);
        let dist = if seg_len <= EPSILON {
            point.distance(&start)
        } else {
            let t = ((point.x - start.x) * (end.x - start.x)
                + (point.y - start.y) * (end.y - start.y))
                / (seg_len * seg_len);
            let t = t.clamp(0.0, 1.0);
            point.distance(&Point {
                x: start.x + t * (end.x - start.x),
                y: start.y + t * (end.y - start.y),
            })
        };
        if dist <= EPSILON {
            return true;
        }
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let pi = polygon[i];
        let pj = polygon[j];
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

pub fn rect_overlaps_polygon(rect: &Rect, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    if polygon.iter().any(|p| BoundingBox::contains_point(rect, p)) {
        return true;
    }
    let corners = rect.corners();
    if corners.iter().any(|c| point_in_polygon(c, polygon)) {
        return true;
    }
    for i in 0..polygon.len() {
        let e1 = polygon[i];
        let e2 = polygon[(i + 1) % polygon.len()];
        for j in 0..4 {
            if segments_intersect(corners[j], corners[(j + 1) % 4], e1, e2) {
                return true;
            }
        }
    }
    false
}

pub fn rect_inside_polygon(rect: &Rect, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let corners = rect.corners();
    if !corners.iter().all(|c| point_in_polygon(c, polygon)) {
        return false;
    }
    // A polygon vertex poking into the rectangle means an edge cuts through it.
    !polygon.iter().any(|p| {
        let tl = rect.top_left();
        let br = rect.bottom_right();
        p.x > tl.x && p.x < br.x && p.y > tl.y && p.y < br.y
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(size, 0.0),
            Point::new(size, size),
            Point::new(0.0, size),
        ]
    }

    #[test]
    fn point_in_polygon_includes_boundary() {
        let polygon = square(10.0);
        assert!(point_in_polygon(&Point::new(5.0, 5.0), &polygon));
        assert!(point_in_polygon(&Point::new(0.0, 5.0), &polygon));
        assert!(!point_in_polygon(&Point::new(-1.0, 5.0), &polygon));
    }

    #[test]
    fn rect_polygon_overlap() {
        let polygon = square(10.0);
        let inside = Rect::new(Point::new(5.0, 5.0), 2.0, 2.0);
        let straddling = Rect::new(Point::new(10.0, 5.0), 4.0, 2.0);
        let outside = Rect::new(Point::new(20.0, 5.0), 2.0, 2.0);
        assert!(rect_overlaps_polygon(&inside, &polygon));
        assert!(rect_inside_polygon(&inside, &polygon));
        assert!(rect_overlaps_polygon(&straddling, &polygon));
        assert!(!rect_inside_polygon(&straddling, &polygon));
        assert!(!rect_overlaps_polygon(&outside, &polygon));
    }

    #[test]
    fn rect_overlap_area() {
        let a = Rect::new(Point::new(0.0, 0.0), 4.0, 4.0);
        let b = Rect::new(Point::new(2.0, 0.0), 4.0, 4.0);
        assert_eq!(a.overlap_area(&b), 8.0);
        let c = Rect::new(Point::new(10.0, 0.0), 2.0, 2.0);
        assert_eq!(a.overlap_area(&c), 0.0);
    }
}
