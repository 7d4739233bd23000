use line_core::{
    nalgebra::{UnitVector3, Vector3},
    Camera, ImageId, Pose,
};
use std::collections::BTreeMap;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The vanishing point a 2d segment was associated with, as a world frame direction.
///
/// Segments sharing a `group` within an image point towards the same vanishing point.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct VpHint {
    pub group: usize,
    pub direction: UnitVector3<f64>,
}

/// Looks up the vanishing point hint of a 2d segment.
pub trait VpLookup: Sync {
    fn hint(&self, image: ImageId, segment: usize) -> Option<VpHint>;
}

/// Vanishing point hints for every segment of every image, indexed by segment.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct VpAssociation {
    images: BTreeMap<ImageId, Vec<Option<VpHint>>>,
}

impl VpAssociation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: ImageId, hints: Vec<Option<VpHint>>) -> Option<Vec<Option<VpHint>>> {
        self.images.insert(image, hints)
    }

    pub fn get(&self, image: ImageId) -> Option<&[Option<VpHint>]> {
        self.images.get(&image).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Builds the hints of one image from its vanishing points and the label of every segment.
    ///
    /// Vanishing points are homogeneous pixel coordinates, so points at infinity (`z = 0`) are
    /// supported. Each is back-projected through the camera into a world direction. A label
    /// indexes `vanishing_points`; segments without a label or with an out of range label, or
    /// whose vanishing point is degenerate, get no hint.
    pub fn hints_from_vanishing_points(
        camera: &Camera,
        vanishing_points: &[Vector3<f64>],
        labels: &[Option<usize>],
    ) -> Vec<Option<VpHint>> {
        let to_world = camera.pose.inverse();
        let inverse_intrinsics = camera.intrinsics.inverse_matrix();
        let directions: Vec<Option<UnitVector3<f64>>> = vanishing_points
            .iter()
            .map(|vp| {
                let direction = to_world.transform_vector(inverse_intrinsics * vp);
                UnitVector3::try_new(direction, f64::EPSILON)
                    .filter(|direction| direction.iter().all(|n| n.is_finite()))
            })
            .collect();
        labels
            .iter()
            .map(|&label| {
                let group = label?;
                let direction = (*directions.get(group)?)?;
                Some(VpHint { group, direction })
            })
            .collect()
    }
}

impl FromIterator<(ImageId, Vec<Option<VpHint>>)> for VpAssociation {
    fn from_iter<T: IntoIterator<Item = (ImageId, Vec<Option<VpHint>>)>>(iter: T) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

impl VpLookup for VpAssociation {
    fn hint(&self, image: ImageId, segment: usize) -> Option<VpHint> {
        *self.get(image)?.get(segment)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use line_core::{
        nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Translation3},
        CameraIntrinsics, InfiniteLine3d, WorldToCamera,
    };

    #[test]
    fn back_projected_direction_matches_line() {
        let camera = Camera::new(
            CameraIntrinsics::identity()
                .focal(400.0)
                .principal_point(Point2::new(320.0, 240.0)),
            WorldToCamera(IsometryMatrix3::from_parts(
                Translation3::new(0.3, 0.1, 2.0),
                Rotation3::from_euler_angles(0.2, -0.1, 0.3),
            )),
            640,
            480,
        );
        let line = InfiniteLine3d::from_points(Point3::new(0.0, 0.0, 1.0), Point3::new(0.2, 0.1, 2.0))
            .unwrap();
        // The vanishing point of the line is the projection of its direction.
        let camera_direction = camera.pose.transform_vector(line.direction().into_inner());
        let vp = camera.intrinsics.matrix() * camera_direction;
        let hints = VpAssociation::hints_from_vanishing_points(&camera, &[vp], &[Some(0), None, Some(4)]);
        assert_eq!(hints.len(), 3);
        let hint = hints[0].unwrap();
        assert_eq!(hint.group, 0);
        assert_relative_eq!(hint.direction.dot(&line.direction()).abs(), 1.0, epsilon = 1e-9);
        assert!(hints[1].is_none());
        assert!(hints[2].is_none());
    }

    #[test]
    fn lookup_out_of_range() {
        let association: VpAssociation = vec![(
            ImageId(0),
            vec![
                None,
                Some(VpHint {
                    group: 2,
                    direction: Vector3::z_axis(),
                }),
            ],
        )]
        .into_iter()
        .collect();
        assert!(association.hint(ImageId(0), 0).is_none());
        assert_eq!(association.hint(ImageId(0), 1).unwrap().group, 2);
        assert!(association.hint(ImageId(0), 2).is_none());
        assert!(association.hint(ImageId(1), 1).is_none());
    }
}
