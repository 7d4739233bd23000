use super::Bilinear;
use derive_more::{Deref, From, Into};
use line_core::{nalgebra::Point2, ImageId};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Provides line likelihood heatmaps for images.
pub trait HeatmapSampler: Sync {
    /// Checks if a heatmap is available for the image.
    fn has_heatmap(&self, image: ImageId) -> bool;

    /// Samples the heatmap of the image at a sub-pixel position.
    ///
    /// Returns `None` if the image has no heatmap.
    fn sample(&self, image: ImageId, pixel: Point2<f64>) -> Option<f64>;
}

/// A per-pixel line likelihood in `[0, 1]`, stored as `(height, width)`.
#[derive(Debug, Clone, PartialEq, Deref, From, Into)]
pub struct Heatmap(pub Array2<f32>);

impl Heatmap {
    pub fn width(&self) -> usize {
        self.0.ncols()
    }

    pub fn height(&self) -> usize {
        self.0.nrows()
    }

    /// Bilinearly interpolates the heatmap, clamping positions to the heatmap bounds.
    ///
    /// Returns `None` for an empty heatmap or a non-finite position.
    pub fn sample(&self, pixel: Point2<f64>) -> Option<f64> {
        Bilinear::new(self.width(), self.height(), pixel)
            .map(|bilinear| bilinear.interpolate(|x, y| f64::from(self.0[(y, x)])))
    }
}

/// Heatmaps keyed by image.
#[derive(Debug, Clone, Default)]
pub struct HeatmapStore {
    heatmaps: BTreeMap<ImageId, Heatmap>,
}

impl HeatmapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: ImageId, heatmap: Heatmap) -> Option<Heatmap> {
        self.heatmaps.insert(image, heatmap)
    }

    pub fn get(&self, image: ImageId) -> Option<&Heatmap> {
        self.heatmaps.get(&image)
    }

    pub fn len(&self) -> usize {
        self.heatmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heatmaps.is_empty()
    }
}

impl FromIterator<(ImageId, Heatmap)> for HeatmapStore {
    fn from_iter<T: IntoIterator<Item = (ImageId, Heatmap)>>(iter: T) -> Self {
        Self {
            heatmaps: iter.into_iter().collect(),
        }
    }
}

impl HeatmapSampler for HeatmapStore {
    fn has_heatmap(&self, image: ImageId) -> bool {
        self.heatmaps.contains_key(&image)
    }

    fn sample(&self, image: ImageId, pixel: Point2<f64>) -> Option<f64> {
        self.get(image)?.sample(pixel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gradient() -> Heatmap {
        Heatmap(Array2::from_shape_fn((3, 4), |(y, x)| (x + 4 * y) as f32 / 11.0))
    }

    #[test]
    fn integer_coordinates_reproduce_grid() {
        let heatmap = gradient();
        for y in 0..3 {
            for x in 0..4 {
                assert_relative_eq!(
                    heatmap.sample(Point2::new(x as f64, y as f64)).unwrap(),
                    f64::from(heatmap[(y, x)]),
                    epsilon = 1e-7
                );
            }
        }
    }

    #[test]
    fn store_reports_missing_images() {
        let store: HeatmapStore = vec![(ImageId(3), gradient())].into_iter().collect();
        assert!(store.has_heatmap(ImageId(3)));
        assert!(!store.has_heatmap(ImageId(4)));
        assert!(store.sample(ImageId(4), Point2::new(1.0, 1.0)).is_none());
        assert_relative_eq!(
            store.sample(ImageId(3), Point2::new(0.5, 0.0)).unwrap(),
            0.5 / 11.0,
            epsilon = 1e-7
        );
    }
}
