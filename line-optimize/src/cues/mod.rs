//! Optional auxiliary signals that residuals can be built from.
//!
//! Every cue is exposed through a `Sync` sampler trait so that stores are shared by reference
//! between the worker threads refining tracks. A store that has no data for an image reports
//! the cue as unavailable for that image, and the corresponding residuals are skipped.

mod feature;
mod heatmap;
mod vp;

pub use feature::*;
pub use heatmap::*;
pub use vp::*;

use line_core::{nalgebra::Point2, ImageId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CueError {
    #[error("feature map for image {image} has {found} channels, but the store holds {expected}")]
    ChannelMismatch {
        image: ImageId,
        expected: usize,
        found: usize,
    },
    #[error("feature patch for image {image} has a non-positive or non-finite scale {scale}")]
    InvalidPatchScale { image: ImageId, scale: f64 },
}

/// The four grid cells surrounding a sub-pixel position and the interpolation fractions.
///
/// Grid values are located at integer pixel coordinates. Positions outside of the grid are
/// clamped to its border.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bilinear {
    x: [usize; 2],
    y: [usize; 2],
    fx: f64,
    fy: f64,
}

impl Bilinear {
    fn new(width: usize, height: usize, pixel: Point2<f64>) -> Option<Self> {
        if width == 0 || height == 0 || !pixel.x.is_finite() || !pixel.y.is_finite() {
            return None;
        }
        let (x, fx) = Self::axis(width, pixel.x);
        let (y, fy) = Self::axis(height, pixel.y);
        Some(Self { x, y, fx, fy })
    }

    fn axis(size: usize, position: f64) -> ([usize; 2], f64) {
        let position = position.clamp(0.0, (size - 1) as f64);
        let low = position.floor() as usize;
        let high = (low + 1).min(size - 1);
        ([low, high], position - low as f64)
    }

    /// Interpolates with `get(x, y)` providing the grid values.
    fn interpolate(&self, get: impl Fn(usize, usize) -> f64) -> f64 {
        let top = (1.0 - self.fx) * get(self.x[0], self.y[0]) + self.fx * get(self.x[1], self.y[0]);
        let bottom =
            (1.0 - self.fx) * get(self.x[0], self.y[1]) + self.fx * get(self.x[1], self.y[1]);
        (1.0 - self.fy) * top + self.fy * bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bilinear_clamps_to_border() {
        let sample = Bilinear::new(4, 3, Point2::new(-2.0, 7.5)).unwrap();
        assert_eq!(sample.x, [0, 1]);
        assert_eq!(sample.y, [2, 2]);
        assert_relative_eq!(sample.fx, 0.0);
        assert!(Bilinear::new(0, 3, Point2::new(0.0, 0.0)).is_none());
        assert!(Bilinear::new(4, 3, Point2::new(f64::NAN, 0.0)).is_none());
    }

    #[test]
    fn bilinear_interpolates_plane() {
        let plane = |x: usize, y: usize| 2.0 * x as f64 - 3.0 * y as f64 + 1.0;
        let sample = Bilinear::new(5, 5, Point2::new(1.25, 2.5)).unwrap();
        assert_relative_eq!(sample.interpolate(plane), 2.5 - 7.5 + 1.0, epsilon = 1e-12);
    }
}
