use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Point3, Rotation3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented by the poses in this library:
///
/// * [`CameraToWorld`] - Transforms camera frame points into world frame points
/// * [`WorldToCamera`] - Transforms world frame points into camera frame points
pub trait Pose: From<IsometryMatrix3<f64>> + Clone + Copy {
    type Inverse: Pose;

    /// Retrieve the isometry.
    fn isometry(self) -> IsometryMatrix3<f64>;

    /// Takes the inverse of the pose.
    fn inverse(self) -> Self::Inverse {
        self.isometry().inverse().into()
    }

    /// Retrieve the rotation component.
    fn rotation(self) -> Rotation3<f64> {
        self.isometry().rotation
    }

    /// Retrieve the translation component.
    fn translation(self) -> Vector3<f64> {
        self.isometry().translation.vector
    }

    /// Transform a point from the input frame to the output frame.
    fn transform(self, input: Point3<f64>) -> Point3<f64> {
        self.isometry() * input
    }

    /// Rotate a direction from the input frame to the output frame.
    fn transform_vector(self, input: Vector3<f64>) -> Vector3<f64> {
        self.isometry().rotation * input
    }
}

/// This contains a world pose, which is a pose of the world relative to the camera.
/// This maps world points into camera points, changing an absolute position into
/// a vector relative to the camera, where the positive X axis is right, positive Y
/// axis is down, and positive Z axis is forwards from the optical center.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl Pose for WorldToCamera {
    type Inverse = CameraToWorld;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// This contains a camera pose, which is a pose of the camera relative to the world.
/// This transforms camera points (with depth as `z`) into world coordinates.
/// This also tells you where the camera is located and oriented in the world.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub IsometryMatrix3<f64>);

impl Pose for CameraToWorld {
    type Inverse = WorldToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}
