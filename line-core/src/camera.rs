use crate::{InfiniteLine3d, Pose, WorldToCamera};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix3, Point2, Point3, UnitVector3, Vector2, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Points closer than this to the camera plane are considered to not project.
const MINIMUM_DEPTH: f64 = 1e-12;

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// Images fed into the refinement are expected to be undistorted already, so the linear
/// intrinsics are all that is needed to move between pixels and normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    #[must_use]
    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    #[must_use]
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    #[must_use]
    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    #[must_use]
    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// The inverse of [`CameraIntrinsics::matrix`], computed in closed form since it is upper triangular.
    #[rustfmt::skip]
    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        let (fx, fy) = (self.focals.x, self.focals.y);
        let (cx, cy) = (self.principal_point.x, self.principal_point.y);
        let s = self.skew;
        Matrix3::new(
            1.0 / fx,   -s / (fx * fy), (s * cy - cx * fy) / (fx * fy),
            0.0,        1.0 / fy,       -cy / fy,
            0.0,        0.0,            1.0,
        )
    }

    /// Converts a pixel into the homogeneous normalized image coordinate (with `z = 1`).
    pub fn calibrate(&self, pixel: Point2<f64>) -> Vector3<f64> {
        let y = (pixel.y - self.principal_point.y) / self.focals.y;
        let x = (pixel.x - self.principal_point.x - self.skew * y) / self.focals.x;
        Vector3::new(x, y, 1.0)
    }

    /// Converts a normalized image coordinate back into a pixel.
    pub fn uncalibrate(&self, normalized: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.focals.x * normalized.x + self.skew * normalized.y + self.principal_point.x,
            self.focals.y * normalized.y + self.principal_point.y,
        )
    }
}

/// A homogeneous line `ax + by + c = 0` in pixel coordinates, normalized so that `a² + b² = 1`.
///
/// Because of the normalization, evaluating the line at a pixel yields the signed perpendicular
/// distance of the pixel to the line in pixels.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct ImageLine(pub Vector3<f64>);

impl ImageLine {
    /// Normalizes homogeneous line coefficients.
    ///
    /// Returns `None` when the coefficients describe the line at infinity.
    pub fn from_homogeneous(coefficients: Vector3<f64>) -> Option<Self> {
        let norm = coefficients.xy().norm();
        if norm.is_finite() && norm > f64::EPSILON * coefficients.z.abs().max(1.0) {
            Some(Self(coefficients / norm))
        } else {
            None
        }
    }

    /// The unit normal `(a, b)` of the line.
    pub fn normal(&self) -> Vector2<f64> {
        self.0.xy()
    }

    /// A unit vector pointing along the line.
    pub fn direction(&self) -> Vector2<f64> {
        Vector2::new(-self.0.y, self.0.x)
    }

    /// The signed perpendicular distance from the point to the line.
    pub fn signed_distance(&self, point: Point2<f64>) -> f64 {
        self.0.x * point.x + self.0.y * point.y + self.0.z
    }

    /// The orthogonal projection of the point onto the line.
    pub fn project_point(&self, point: Point2<f64>) -> Point2<f64> {
        point - self.signed_distance(point) * self.normal()
    }
}

/// A calibrated pinhole camera: intrinsics, the pose of the world relative to the camera,
/// and the dimensions of the image it captured.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Camera {
    pub intrinsics: CameraIntrinsics,
    pub pose: WorldToCamera,
    pub width: u32,
    pub height: u32,
}

impl Camera {
    pub fn new(intrinsics: CameraIntrinsics, pose: WorldToCamera, width: u32, height: u32) -> Self {
        Self {
            intrinsics,
            pose,
            width,
            height,
        }
    }

    /// The optical center of the camera in world coordinates.
    pub fn center(&self) -> Point3<f64> {
        self.pose.inverse().translation().into()
    }

    /// Projects a world point into the image.
    ///
    /// Since this might not be possible (if the point is behind the camera),
    /// this operation is fallible.
    pub fn project(&self, point: Point3<f64>) -> Option<Point2<f64>> {
        let camera_point = self.pose.transform(point);
        if camera_point.z > MINIMUM_DEPTH {
            Some(
                self.intrinsics
                    .uncalibrate(Point2::from(camera_point.coords.xy() / camera_point.z)),
            )
        } else {
            None
        }
    }

    /// The world frame bearing of the ray leaving the optical center through the pixel.
    pub fn ray(&self, pixel: Point2<f64>) -> UnitVector3<f64> {
        let camera_bearing = self.intrinsics.calibrate(pixel);
        UnitVector3::new_normalize(self.pose.inverse().transform_vector(camera_bearing))
    }

    /// Projects an infinite 3d line into the image.
    ///
    /// Returns `None` if the line passes through the optical center, since it then projects to a point.
    pub fn project_line(&self, line: &InfiniteLine3d) -> Option<ImageLine> {
        let rotation = self.pose.rotation();
        let direction = rotation * line.direction().into_inner();
        let moment = rotation * line.moment() + self.pose.translation().cross(&direction);
        ImageLine::from_homogeneous(self.intrinsics.inverse_matrix().transpose() * moment)
    }

    /// Length of the image diagonal in pixels.
    pub fn diagonal(&self) -> f64 {
        f64::from(self.width).hypot(f64::from(self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{IsometryMatrix3, Rotation3, Translation3};

    fn some_camera() -> Camera {
        let intrinsics = CameraIntrinsics::identity()
            .focals(Vector2::new(500.0, 480.0))
            .principal_point(Point2::new(320.0, 240.0))
            .skew(0.5);
        let pose = WorldToCamera(IsometryMatrix3::from_parts(
            Translation3::new(0.1, -0.2, 3.0),
            Rotation3::from_euler_angles(0.1, -0.2, 0.05),
        ));
        Camera::new(intrinsics, pose, 640, 480)
    }

    #[test]
    fn intrinsics_inverse() {
        let intrinsics = some_camera().intrinsics;
        assert_relative_eq!(
            intrinsics.matrix() * intrinsics.inverse_matrix(),
            Matrix3::identity(),
            epsilon = 1e-12
        );
        let pixel = Point2::new(12.5, 400.25);
        let normalized = intrinsics.calibrate(pixel);
        assert_relative_eq!(
            intrinsics.uncalibrate(Point2::from(normalized.xy())),
            pixel,
            epsilon = 1e-9
        );
    }

    #[test]
    fn ray_reprojects_onto_pixel() {
        let camera = some_camera();
        let pixel = Point2::new(100.0, 50.0);
        let point = camera.center() + 4.0 * camera.ray(pixel).into_inner();
        assert_relative_eq!(camera.project(point).unwrap(), pixel, epsilon = 1e-8);
    }

    #[test]
    fn line_projection_matches_point_projection() {
        let camera = some_camera();
        let a = Point3::new(-0.5, 0.3, 1.0);
        let b = Point3::new(0.7, -0.1, 2.0);
        let image_line = camera
            .project_line(&InfiniteLine3d::from_points(a, b).unwrap())
            .unwrap();
        for t in [-1.0, 0.0, 0.3, 1.0, 2.5] {
            let pixel = camera.project(a + t * (b - a)).unwrap();
            assert!(image_line.signed_distance(pixel).abs() < 1e-8);
        }
    }

    #[test]
    fn behind_camera_does_not_project() {
        let camera = some_camera();
        let behind = camera.center() - 2.0 * camera.ray(Point2::new(320.0, 240.0)).into_inner();
        assert!(camera.project(behind).is_none());
    }
}
