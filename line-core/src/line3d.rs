use nalgebra::{Point3, UnitVector3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// An infinite 3d line in Plücker coordinates.
///
/// The direction is kept at unit length and the moment `m = p × d` is kept orthogonal to it,
/// so the pair always represents a valid line. The moment's norm is the distance of the line
/// from the world origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InfiniteLine3d {
    direction: UnitVector3<f64>,
    moment: Vector3<f64>,
}

impl InfiniteLine3d {
    /// Creates the line passing through `point` along `direction`.
    pub fn new(point: Point3<f64>, direction: UnitVector3<f64>) -> Self {
        Self {
            direction,
            moment: point.coords.cross(&direction),
        }
    }

    /// Creates the line passing through two points.
    ///
    /// Returns `None` if the points coincide.
    pub fn from_points(a: Point3<f64>, b: Point3<f64>) -> Option<Self> {
        let direction = UnitVector3::try_new(b - a, f64::EPSILON)?;
        let line = Self::new(a, direction);
        line.is_finite().then(|| line)
    }

    /// Creates the line supporting a segment, or `None` for a zero-length segment.
    pub fn from_segment(segment: &Line3d) -> Option<Self> {
        Self::from_points(segment.start, segment.end)
    }

    /// Creates the line from unnormalized Plücker coordinates.
    ///
    /// The coordinates are rescaled so the direction has unit length and the moment is
    /// re-orthogonalized against the direction. Returns `None` for a zero or non-finite direction.
    pub fn from_plucker(direction: Vector3<f64>, moment: Vector3<f64>) -> Option<Self> {
        let norm = direction.norm();
        if !norm.is_finite() || norm <= f64::EPSILON {
            return None;
        }
        let direction = UnitVector3::new_unchecked(direction / norm);
        let moment = moment / norm;
        let line = Self {
            direction,
            moment: moment - moment.dot(&direction) * direction.into_inner(),
        };
        line.is_finite().then(|| line)
    }

    pub fn direction(&self) -> UnitVector3<f64> {
        self.direction
    }

    pub fn moment(&self) -> Vector3<f64> {
        self.moment
    }

    /// The point on the line closest to the world origin.
    pub fn foot(&self) -> Point3<f64> {
        self.direction.cross(&self.moment).into()
    }

    /// The point at signed distance `s` from the [`InfiniteLine3d::foot`] along the direction.
    pub fn point_at(&self, s: f64) -> Point3<f64> {
        self.foot() + s * self.direction.into_inner()
    }

    /// The signed position of the orthogonal projection of `point` along the line.
    pub fn parameter_of(&self, point: Point3<f64>) -> f64 {
        (point - self.foot()).dot(&self.direction)
    }

    /// The orthogonal projection of `point` onto the line.
    pub fn project_point(&self, point: Point3<f64>) -> Point3<f64> {
        self.point_at(self.parameter_of(point))
    }

    pub fn distance_to_point(&self, point: Point3<f64>) -> f64 {
        (point - self.project_point(point)).norm()
    }

    /// The shortest distance between two infinite lines.
    pub fn distance_to_line(&self, other: &InfiniteLine3d) -> f64 {
        let normal = self.direction.cross(&other.direction);
        let normal_norm = normal.norm();
        if normal_norm < 1e-12 {
            // Parallel lines are equidistant everywhere.
            self.distance_to_point(other.foot())
        } else {
            (other.foot() - self.foot()).dot(&normal).abs() / normal_norm
        }
    }

    /// Finds the closest approach between this line and a ray leaving `origin` along `bearing`.
    ///
    /// Returns the line parameter (see [`InfiniteLine3d::point_at`]) and the distance along the
    /// ray, or `None` if the ray is parallel to the line.
    pub fn closest_parameters_to_ray(
        &self,
        origin: Point3<f64>,
        bearing: UnitVector3<f64>,
    ) -> Option<(f64, f64)> {
        let w = self.foot() - origin;
        let b = self.direction.dot(&bearing);
        let denominator = 1.0 - b * b;
        if denominator < 1e-12 {
            return None;
        }
        let d = self.direction.dot(&w);
        let e = bearing.dot(&w);
        let s = (b * e - d) / denominator;
        let u = (e - b * d) / denominator;
        Some((s, u))
    }

    /// The point on this line closest to the ray leaving `origin` along `bearing`.
    pub fn closest_point_to_ray(
        &self,
        origin: Point3<f64>,
        bearing: UnitVector3<f64>,
    ) -> Option<Point3<f64>> {
        self.closest_parameters_to_ray(origin, bearing)
            .map(|(s, _)| self.point_at(s))
    }

    pub fn is_finite(&self) -> bool {
        self.direction.iter().chain(self.moment.iter()).all(|n| n.is_finite())
    }
}

/// A 3d line segment defined by its two endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-serialize",
    serde(from = "[[f64; 3]; 2]", into = "[[f64; 3]; 2]")
)]
pub struct Line3d {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
}

impl Line3d {
    pub fn new(start: Point3<f64>, end: Point3<f64>) -> Self {
        Self { start, end }
    }

    /// Clips an infinite line to the parameter span `[s_start, s_end]`.
    pub fn from_infinite_span(line: &InfiniteLine3d, s_start: f64, s_end: f64) -> Self {
        Self::new(line.point_at(s_start), line.point_at(s_end))
    }

    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    pub fn midpoint(&self) -> Point3<f64> {
        nalgebra::center(&self.start, &self.end)
    }

    pub fn direction(&self) -> Option<UnitVector3<f64>> {
        UnitVector3::try_new(self.end - self.start, f64::EPSILON)
    }

    /// The infinite line supporting this segment, or `None` for a zero-length segment.
    pub fn infinite(&self) -> Option<InfiniteLine3d> {
        InfiniteLine3d::from_segment(self)
    }

    /// The endpoints flattened as `[x1, y1, z1, x2, y2, z2]`.
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.start.x,
            self.start.y,
            self.start.z,
            self.end.x,
            self.end.y,
            self.end.z,
        ]
    }
}

impl From<[[f64; 3]; 2]> for Line3d {
    fn from([start, end]: [[f64; 3]; 2]) -> Self {
        Self::new(start.into(), end.into())
    }
}

impl From<Line3d> for [[f64; 3]; 2] {
    fn from(line: Line3d) -> Self {
        [line.start.into(), line.end.into()]
    }
}
