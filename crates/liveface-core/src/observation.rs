use serde::{Deserialize, Serialize};

/// Floor applied to every denominator in geometric ratios. Degenerate
/// landmark clusters (all points coincident) otherwise blow up the ratios.
pub const MIN_DENOMINATOR: f32 = 1e-3;

/// A 2D landmark point in normalized image coordinates ([0,1] on each axis,
/// origin at the top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }

    /// Angle of the vector from `self` to `other`, in radians.
    pub fn angle_to(&self, other: &Point) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }
}

/// Mean position of a point group. `None` for an empty group.
pub fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point {
        x: sx / n,
        y: sy / n,
    })
}

/// Horizontal extent (max x − min x) of a point group.
pub fn x_extent(points: &[Point]) -> f32 {
    extent(points, |p| p.x)
}

/// Vertical extent (max y − min y) of a point group.
pub fn y_extent(points: &[Point]) -> f32 {
    extent(points, |p| p.y)
}

fn extent(points: &[Point], axis: impl Fn(&Point) -> f32) -> f32 {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for p in points {
        let v = axis(p);
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() {
        max - min
    } else {
        0.0
    }
}

/// Face bounding box in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Fraction of the frame covered by the box.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }
}

/// Named landmark groups for one detected face. Eye contours are 6 ordered
/// points following the standard eye-aspect-ratio convention (index 0 at the
/// outer corner, 3 at the inner corner, 1/2 on the upper lid, 4/5 on the
/// lower lid). Eyebrow groups may be empty on detectors that do not emit
/// them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub left_brow: Vec<Point>,
    pub right_brow: Vec<Point>,
    pub nose: Vec<Point>,
    pub outer_lips: Vec<Point>,
    pub face_contour: Vec<Point>,
}

/// One camera frame's detected face, as delivered by the external vision
/// pipeline. When multiple faces are in frame the detector reports the
/// largest one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    pub bounding_box: BoundingBox,
    /// Head rotation around the vertical axis, radians. Negative = turned left.
    pub yaw: f32,
    /// Head rotation around the horizontal axis, radians. Positive = tilted up.
    pub pitch: f32,
    /// In-plane head tilt, radians.
    pub roll: f32,
    /// Detector quality score in [0,1].
    pub quality: f32,
    pub landmarks: Landmarks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_known_geometry() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn centroid_of_empty_group_is_none() {
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn centroid_averages_points() {
        let c = centroid(&[Point::new(0.0, 0.0), Point::new(1.0, 0.5)]).unwrap();
        assert!((c.x - 0.5).abs() < 1e-6);
        assert!((c.y - 0.25).abs() < 1e-6);
    }

    #[test]
    fn extents() {
        let pts = [
            Point::new(0.1, 0.3),
            Point::new(0.5, 0.2),
            Point::new(0.3, 0.9),
        ];
        assert!((x_extent(&pts) - 0.4).abs() < 1e-6);
        assert!((y_extent(&pts) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn bounding_box_area_and_center() {
        let b = BoundingBox {
            x: 0.2,
            y: 0.2,
            width: 0.5,
            height: 0.6,
        };
        assert!((b.area() - 0.3).abs() < 1e-6);
        let c = b.center();
        assert!((c.x - 0.45).abs() < 1e-6);
        assert!((c.y - 0.5).abs() < 1e-6);
    }
}
