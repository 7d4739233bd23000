use crate::InfiniteLine3d;
use nalgebra::{Point3, UnitVector3, Vector3, Vector4};

/// A minimal local parameterization of the 4 degree of freedom manifold of 3d lines.
///
/// The chart is centered on a base line. Its four coordinates are:
///
/// * `δ₀, δ₁` - the offset of the direction in the plane tangent to the base direction
/// * `δ₂, δ₃` - the offset of the line's crossing point with the plane through the anchor
///   that is orthogonal to the base direction
///
/// Every finite coordinate vector maps to a valid line: the direction `d₀ + δ₀e₁ + δ₁e₂` has a
/// norm of at least one and the crossing point is finite. This lets an unconstrained optimizer
/// move the line freely without any rank or orthogonality constraint to maintain.
///
/// The coordinate origin is always the base line itself, so recentering the chart after a solve
/// is done by simply creating a new chart on the solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineChart {
    base: InfiniteLine3d,
    anchor: Point3<f64>,
    tangent: [Vector3<f64>; 2],
}

impl LineChart {
    /// The number of coordinates of the chart.
    pub const DIMENSION: usize = 4;

    /// Creates a chart anchored at the base line's closest point to the world origin.
    pub fn new(base: InfiniteLine3d) -> Self {
        let anchor = base.foot();
        Self::with_anchor(base, anchor)
    }

    /// Creates a chart anchored at the point of the base line closest to `center`.
    ///
    /// Anchoring near the observed part of the line keeps translations and rotations of the
    /// line decoupled, which improves the conditioning of optimization.
    pub fn centered_at(base: InfiniteLine3d, center: Point3<f64>) -> Self {
        let anchor = base.project_point(center);
        Self::with_anchor(base, anchor)
    }

    fn with_anchor(base: InfiniteLine3d, anchor: Point3<f64>) -> Self {
        let direction = base.direction();
        // Cross with the axis least aligned with the direction to get a stable orthogonal vector.
        let axis = direction
            .iter()
            .map(|n| n.abs())
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(ix, _)| Vector3::ith(ix, 1.0))
            .unwrap_or_else(Vector3::x);
        let first = direction.cross(&axis).normalize();
        let second = direction.cross(&first);
        Self {
            base,
            anchor,
            tangent: [first, second],
        }
    }

    pub fn base(&self) -> &InfiniteLine3d {
        &self.base
    }

    pub fn anchor(&self) -> Point3<f64> {
        self.anchor
    }

    /// Maps chart coordinates to a line.
    ///
    /// Returns `None` if the coordinates are not finite, which would produce a degenerate line.
    pub fn retract(&self, delta: &Vector4<f64>) -> Option<InfiniteLine3d> {
        if !delta.iter().all(|n| n.is_finite()) {
            return None;
        }
        let [first, second] = self.tangent;
        let direction = self.base.direction().into_inner() + delta[0] * first + delta[1] * second;
        let point = self.anchor + delta[2] * first + delta[3] * second;
        let line = InfiniteLine3d::new(point, UnitVector3::try_new(direction, f64::EPSILON)?);
        line.is_finite().then(|| line)
    }

    /// Maps a line to chart coordinates.
    ///
    /// Returns `None` if the line is orthogonal to the base direction, which the chart cannot express.
    pub fn local(&self, line: &InfiniteLine3d) -> Option<Vector4<f64>> {
        let base_direction = self.base.direction();
        let alignment = line.direction().dot(&base_direction);
        if alignment <= 1e-12 {
            return None;
        }
        let [first, second] = self.tangent;
        let scaled_direction = line.direction().into_inner() / alignment;
        let s = (self.anchor - line.foot()).dot(&base_direction) / alignment;
        let offset = line.point_at(s) - self.anchor;
        Some(Vector4::new(
            scaled_direction.dot(&first),
            scaled_direction.dot(&second),
            offset.dot(&first),
            offset.dot(&second),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn some_line() -> InfiniteLine3d {
        InfiniteLine3d::from_points(Point3::new(1.0, -2.0, 4.0), Point3::new(1.5, -1.0, 6.0)).unwrap()
    }

    #[test]
    fn zero_is_identity() {
        let line = some_line();
        let chart = LineChart::centered_at(line, Point3::new(3.0, 3.0, 3.0));
        let retracted = chart.retract(&Vector4::zeros()).unwrap();
        assert_relative_eq!(retracted.direction(), line.direction(), epsilon = 1e-12);
        assert_relative_eq!(retracted.moment(), line.moment(), epsilon = 1e-12);
    }

    #[test]
    fn local_inverts_retract() {
        let chart = LineChart::new(some_line());
        let delta = Vector4::new(0.1, -0.3, 2.0, -0.7);
        let line = chart.retract(&delta).unwrap();
        assert_relative_eq!(chart.local(&line).unwrap(), delta, epsilon = 1e-10);
    }

    #[test]
    fn tangent_basis_is_orthonormal() {
        let chart = LineChart::new(some_line());
        let [first, second] = chart.tangent;
        let direction = chart.base().direction();
        assert_relative_eq!(first.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(second.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(first.dot(&second), 0.0, epsilon = 1e-12);
        assert_relative_eq!(first.dot(&direction), 0.0, epsilon = 1e-12);
        assert_relative_eq!(second.dot(&direction), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_update_is_rejected() {
        let chart = LineChart::new(some_line());
        assert!(chart.retract(&Vector4::new(f64::NAN, 0.0, 0.0, 0.0)).is_none());
        assert!(chart.retract(&Vector4::new(0.0, 0.0, f64::INFINITY, 0.0)).is_none());
    }
}
