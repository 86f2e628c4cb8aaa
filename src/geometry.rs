//! Point-in-polygon containment.
//!
//! Boundary policy: **inclusive**. A point lying exactly on an edge or on a
//! vertex is classified as inside. The edge test is an exact orientation check
//! on `f64` coordinates and runs before the even-odd ray cast, so the same
//! point/polygon pair always yields the same answer.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A 2D point in frame-pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounds of a polygon.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// Closed polygon with at least three vertices, not all collinear.
///
/// Self-intersecting outlines are accepted and classified by the even-odd rule.
///
/// Construction is the only place a polygon can be rejected; once built,
/// [`Polygon::contains`] has no failure modes.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    vertices: Vec<Point>,
    bounds: Bounds,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(anyhow!(
                "zone polygon needs at least 3 vertices, got {}",
                vertices.len()
            ));
        }
        if let Some(bad) = vertices.iter().find(|v| !v.x.is_finite() || !v.y.is_finite()) {
            return Err(anyhow!(
                "zone polygon vertex ({}, {}) is not finite",
                bad.x,
                bad.y
            ));
        }
        if all_collinear(&vertices) {
            return Err(anyhow!("zone polygon vertices are collinear"));
        }

        let mut min = vertices[0];
        let mut max = vertices[0];
        for v in &vertices[1..] {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
        }

        Ok(Self {
            vertices,
            bounds: Bounds { min, max },
        })
    }

    /// Build a polygon from `[x, y]` pairs.
    pub fn from_pairs(pairs: &[[f64; 2]]) -> Result<Self> {
        Self::new(pairs.iter().map(|[x, y]| Point::new(*x, *y)).collect())
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn bounding_box(&self) -> Bounds {
        self.bounds
    }

    /// True iff `point` is inside the polygon or on its boundary.
    pub fn contains(&self, point: Point) -> bool {
        contains(self, point)
    }

    /// Map every vertex through `f`. Used to scale normalized zones to pixels.
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Result<Self> {
        Self::new(self.vertices.iter().copied().map(f).collect())
    }
}

/// True iff `point` lies within or on the boundary of `polygon`.
pub fn contains(polygon: &Polygon, point: Point) -> bool {
    if !point.x.is_finite() || !point.y.is_finite() {
        return false;
    }
    if !polygon.bounds.contains(point) {
        return false;
    }

    let vertices = &polygon.vertices;
    let n = vertices.len();

    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        if on_segment(a, b, point) {
            return true;
        }
    }

    // Even-odd rule: count edge crossings of a ray cast towards +x.
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.y > point.y) != (vj.y > point.y) {
            let x_cross = (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross != 0.0 {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn all_collinear(vertices: &[Point]) -> bool {
    let a = vertices[0];
    let Some(b) = vertices.iter().copied().find(|&v| v != a) else {
        return true;
    };
    vertices
        .iter()
        .all(|c| (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x) == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::from_pairs(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]).unwrap()
    }

    #[test]
    fn interior_and_exterior_points() {
        let poly = square();
        assert!(poly.contains(Point::new(5.0, 5.0)));
        assert!(!poly.contains(Point::new(15.0, 5.0)));
        assert!(!poly.contains(Point::new(-0.001, 5.0)));
    }

    #[test]
    fn boundary_points_are_inside() {
        let poly = square();
        assert!(poly.contains(Point::new(10.0, 5.0)));
        assert!(poly.contains(Point::new(5.0, 0.0)));
        assert!(poly.contains(Point::new(0.0, 0.0)));
        assert!(poly.contains(Point::new(10.0, 10.0)));
    }

    #[test]
    fn boundary_classification_is_stable() {
        let poly =
            Polygon::from_pairs(&[[0.0, 0.0], [640.0, 0.0], [640.0, 720.0], [0.0, 720.0]]).unwrap();
        let edge = Point::new(640.0, 600.0);
        let first = poly.contains(edge);
        for _ in 0..1_000 {
            assert_eq!(poly.contains(edge), first);
        }
        assert!(first);
    }

    #[test]
    fn concave_polygon_notch_is_outside() {
        // U shape with a notch cut from the top middle.
        let poly = Polygon::from_pairs(&[
            [0.0, 0.0],
            [3.0, 0.0],
            [3.0, 3.0],
            [2.0, 3.0],
            [2.0, 1.0],
            [1.0, 1.0],
            [1.0, 3.0],
            [0.0, 3.0],
        ])
        .unwrap();
        assert!(!poly.contains(Point::new(1.5, 2.0)));
        assert!(poly.contains(Point::new(0.5, 2.0)));
        assert!(poly.contains(Point::new(2.5, 2.0)));
        assert!(poly.contains(Point::new(1.5, 0.5)));
    }

    #[test]
    fn rejects_degenerate_polygons() {
        assert!(Polygon::from_pairs(&[[0.0, 0.0], [1.0, 1.0]]).is_err());
        assert!(Polygon::from_pairs(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]).is_err());
        assert!(Polygon::from_pairs(&[[0.0, 0.0], [f64::NAN, 1.0], [2.0, 0.0]]).is_err());
        assert!(Polygon::from_pairs(&[[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]).is_err());
    }

    #[test]
    fn bowtie_with_cancelling_lobes_is_accepted() {
        let poly = Polygon::from_pairs(&[[0.0, 0.0], [2.0, 2.0], [2.0, 0.0], [0.0, 2.0]]).unwrap();
        assert!(poly.contains(Point::new(0.3, 0.8)));
        assert!(poly.contains(Point::new(1.7, 0.8)));
        assert!(!poly.contains(Point::new(1.0, 0.3)));
    }

    #[test]
    fn non_finite_point_is_outside() {
        assert!(!square().contains(Point::new(f64::NAN, 5.0)));
    }
}
