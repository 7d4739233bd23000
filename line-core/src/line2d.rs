use crate::ImageLine;
use nalgebra::{Point2, Vector2, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A line segment detected on an image, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-serialize",
    serde(from = "[f64; 4]", into = "[f64; 4]")
)]
pub struct Line2d {
    pub start: Point2<f64>,
    pub end: Point2<f64>,
}

impl Line2d {
    pub fn new(start: Point2<f64>, end: Point2<f64>) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    pub fn midpoint(&self) -> Point2<f64> {
        nalgebra::center(&self.start, &self.end)
    }

    /// The unit direction from `start` to `end`.
    ///
    /// This is `None` for a zero-length segment.
    pub fn direction(&self) -> Option<Vector2<f64>> {
        (self.end - self.start).try_normalize(f64::EPSILON)
    }

    /// Linearly interpolates between the endpoints, where `0.0` is `start` and `1.0` is `end`.
    pub fn point_at(&self, t: f64) -> Point2<f64> {
        self.start + t * (self.end - self.start)
    }

    /// Evenly spaced points from `start` to `end` inclusive.
    ///
    /// A single sample is placed at the midpoint.
    pub fn sample_points(&self, count: usize) -> impl Iterator<Item = Point2<f64>> + '_ {
        (0..count).map(move |ix| {
            if count == 1 {
                self.midpoint()
            } else {
                self.point_at(ix as f64 / (count - 1) as f64)
            }
        })
    }

    /// The infinite image line that supports this segment.
    pub fn image_line(&self) -> Option<ImageLine> {
        ImageLine::from_homogeneous(
            Vector3::new(self.start.x, self.start.y, 1.0)
                .cross(&Vector3::new(self.end.x, self.end.y, 1.0)),
        )
    }

    /// The perpendicular distance from the point to the infinite line supporting this segment.
    ///
    /// Degenerate segments fall back to the distance to `start`.
    pub fn perpendicular_distance(&self, point: Point2<f64>) -> f64 {
        self.image_line()
            .map(|line| line.signed_distance(point).abs())
            .unwrap_or_else(|| (point - self.start).norm())
    }

    /// The endpoints as `[x1, y1, x2, y2]`.
    pub fn as_array(&self) -> [f64; 4] {
        [self.start.x, self.start.y, self.end.x, self.end.y]
    }
}

impl From<[f64; 4]> for Line2d {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self::new(Point2::new(x1, y1), Point2::new(x2, y2))
    }
}

impl From<Line2d> for [f64; 4] {
    fn from(line: Line2d) -> Self {
        line.as_array()
    }
}
