use super::{Bilinear, CueError};
use float_ord::FloatOrd;
use line_core::{nalgebra::Point2, ImageId};
use ndarray::Array3;
use std::collections::BTreeMap;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Provides dense per-pixel feature descriptors for images.
pub trait FeatureSampler: Sync {
    /// The number of channels of every sampled descriptor.
    fn channels(&self) -> usize;

    /// Checks if features are available for the image.
    fn has_features(&self, image: ImageId) -> bool;

    /// Writes the descriptor at a sub-pixel position into `out`, which must have
    /// [`FeatureSampler::channels`] elements.
    ///
    /// Returns `false` and leaves `out` untouched if the image has no features.
    fn sample_into(&self, image: ImageId, pixel: Point2<f64>, out: &mut [f64]) -> bool;
}

/// A dense feature map stored as `(height, width, channels)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FeatureMap {
    data: Array3<f32>,
}

impl FeatureMap {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Bilinearly interpolates every channel, clamping positions to the map bounds.
    pub fn sample_into(&self, pixel: Point2<f64>, out: &mut [f64]) -> bool {
        let bilinear = match Bilinear::new(self.width(), self.height(), pixel) {
            Some(bilinear) => bilinear,
            None => return false,
        };
        for (channel, value) in out.iter_mut().enumerate().take(self.channels()) {
            *value = bilinear.interpolate(|x, y| f64::from(self.data[(y, x, channel)]));
        }
        true
    }
}

/// A feature map covering a window of an image.
///
/// A pixel `p` of the image maps to `(p - origin) * scale` in the patch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FeaturePatch {
    pub map: FeatureMap,
    pub origin: Point2<f64>,
    pub scale: f64,
}

impl FeaturePatch {
    pub fn new(map: FeatureMap, origin: Point2<f64>, scale: f64) -> Self {
        Self { map, origin, scale }
    }

    fn local(&self, pixel: Point2<f64>) -> Point2<f64> {
        Point2::from((pixel - self.origin) * self.scale)
    }

    /// The squared distance in patch pixels from the pixel to the patch area, zero if it is inside.
    pub fn distance_squared(&self, pixel: Point2<f64>) -> f64 {
        let local = self.local(pixel);
        let outside = |n: f64, size: usize| {
            let max = size.saturating_sub(1) as f64;
            (n - n.clamp(0.0, max)).abs()
        };
        let dx = outside(local.x, self.map.width());
        let dy = outside(local.y, self.map.height());
        dx * dx + dy * dy
    }

    pub fn contains(&self, pixel: Point2<f64>) -> bool {
        self.distance_squared(pixel) == 0.0
    }

    pub fn sample_into(&self, pixel: Point2<f64>, out: &mut [f64]) -> bool {
        self.map.sample_into(self.local(pixel), out)
    }
}

/// One dense feature map per image, covering the whole image.
#[derive(Debug, Clone)]
pub struct FeatureMapStore {
    channels: usize,
    maps: BTreeMap<ImageId, FeatureMap>,
}

impl FeatureMapStore {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            maps: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, image: ImageId, map: FeatureMap) -> Result<Option<FeatureMap>, CueError> {
        if map.channels() != self.channels {
            return Err(CueError::ChannelMismatch {
                image,
                expected: self.channels,
                found: map.channels(),
            });
        }
        Ok(self.maps.insert(image, map))
    }

    pub fn get(&self, image: ImageId) -> Option<&FeatureMap> {
        self.maps.get(&image)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl FeatureSampler for FeatureMapStore {
    fn channels(&self) -> usize {
        self.channels
    }

    fn has_features(&self, image: ImageId) -> bool {
        self.maps.contains_key(&image)
    }

    fn sample_into(&self, image: ImageId, pixel: Point2<f64>, out: &mut [f64]) -> bool {
        self.get(image)
            .map(|map| map.sample_into(pixel, out))
            .unwrap_or(false)
    }
}

/// Feature patches per image, each covering a part of the image.
///
/// A pixel is sampled from the first patch containing it, otherwise from the closest patch.
#[derive(Debug, Clone)]
pub struct PatchStore {
    channels: usize,
    patches: BTreeMap<ImageId, Vec<FeaturePatch>>,
}

impl PatchStore {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            patches: BTreeMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        image: ImageId,
        patches: Vec<FeaturePatch>,
    ) -> Result<Option<Vec<FeaturePatch>>, CueError> {
        for patch in &patches {
            if patch.map.channels() != self.channels {
                return Err(CueError::ChannelMismatch {
                    image,
                    expected: self.channels,
                    found: patch.map.channels(),
                });
            }
            if !(patch.scale.is_finite() && patch.scale > 0.0) {
                return Err(CueError::InvalidPatchScale {
                    image,
                    scale: patch.scale,
                });
            }
        }
        Ok(self.patches.insert(image, patches))
    }

    pub fn get(&self, image: ImageId) -> Option<&[FeaturePatch]> {
        self.patches.get(&image).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

impl FeatureSampler for PatchStore {
    fn channels(&self) -> usize {
        self.channels
    }

    fn has_features(&self, image: ImageId) -> bool {
        self.get(image).map_or(false, |patches| !patches.is_empty())
    }

    fn sample_into(&self, image: ImageId, pixel: Point2<f64>, out: &mut [f64]) -> bool {
        let patches = match self.get(image) {
            Some(patches) => patches,
            None => return false,
        };
        let patch = patches
            .iter()
            .find(|patch| patch.contains(pixel))
            .or_else(|| {
                patches
                    .iter()
                    .min_by_key(|patch| FloatOrd(patch.distance_squared(pixel)))
            });
        patch.map_or(false, |patch| patch.sample_into(pixel, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(height: usize, width: usize, offset: f32) -> FeatureMap {
        FeatureMap::new(Array3::from_shape_fn((height, width, 2), |(y, x, c)| {
            offset + x as f32 + 10.0 * y as f32 + 100.0 * c as f32
        }))
    }

    #[test]
    fn feature_map_reproduces_grid() {
        let map = ramp(3, 5, 0.0);
        let mut out = [0.0; 2];
        assert!(map.sample_into(Point2::new(4.0, 2.0), &mut out));
        assert_relative_eq!(out[0], 24.0);
        assert_relative_eq!(out[1], 124.0);
        assert!(map.sample_into(Point2::new(1.5, 0.5), &mut out));
        assert_relative_eq!(out[0], 6.5);
    }

    #[test]
    fn map_store_rejects_wrong_channel_count() {
        let mut store = FeatureMapStore::new(3);
        assert!(matches!(
            store.insert(ImageId(0), ramp(2, 2, 0.0)),
            Err(CueError::ChannelMismatch { expected: 3, found: 2, .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn patch_store_picks_containing_then_closest_patch() {
        let mut store = PatchStore::new(2);
        store
            .insert(
                ImageId(1),
                vec![
                    FeaturePatch::new(ramp(4, 4, 0.0), Point2::new(0.0, 0.0), 1.0),
                    FeaturePatch::new(ramp(4, 4, 1000.0), Point2::new(100.0, 0.0), 0.5),
                ],
            )
            .unwrap();
        let mut out = [0.0; 2];
        assert!(store.sample_into(ImageId(1), Point2::new(104.0, 2.0), &mut out));
        assert_relative_eq!(out[0], 1000.0 + 2.0 + 10.0);
        // Closer to the second patch, so it is clamped onto its left border.
        assert!(store.sample_into(ImageId(1), Point2::new(60.0, 0.0), &mut out));
        assert_relative_eq!(out[0], 1000.0);
        assert!(!store.sample_into(ImageId(2), Point2::new(1.0, 1.0), &mut out));
        assert!(!store.has_features(ImageId(2)));
    }
}
