use crate::{FeatureSampler, HeatmapSampler, WeightedLoss};
use line_core::{
    nalgebra::{Point2, UnitVector3},
    Camera, ImageId, InfiniteLine3d, Line2d,
};

/// The kind of signal a residual block compares the line against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResidualCategory {
    Reprojection,
    Heatmap,
    Feature,
    VanishingPoint,
}

/// A block of residuals that depends on the 3d line of a single track.
///
/// The block is evaluated raw, then weighted and robustified as a unit by its [`WeightedLoss`].
pub trait ResidualTerm: Send + Sync {
    /// The number of residuals in the block.
    fn len(&self) -> usize;

    fn category(&self) -> ResidualCategory;

    fn loss(&self) -> &WeightedLoss;

    /// Writes the raw residuals for the line into `out`, which has [`ResidualTerm::len`] elements.
    fn evaluate(&self, line: &InfiniteLine3d, out: &mut [f64]);

    /// Evaluates the block and applies its weight and robust loss.
    fn evaluate_weighted(&self, line: &InfiniteLine3d, out: &mut [f64]) {
        self.evaluate(line, out);
        self.loss().apply(out);
    }
}

/// Perpendicular distances of an observed segment's endpoints to the projected line.
#[derive(Debug, Clone)]
pub struct ReprojectionTerm {
    camera: Camera,
    segment: Line2d,
    loss: WeightedLoss,
}

impl ReprojectionTerm {
    pub fn new(camera: Camera, segment: Line2d, loss: WeightedLoss) -> Self {
        Self {
            camera,
            segment,
            loss,
        }
    }
}

impl ResidualTerm for ReprojectionTerm {
    fn len(&self) -> usize {
        2
    }

    fn category(&self) -> ResidualCategory {
        ResidualCategory::Reprojection
    }

    fn loss(&self) -> &WeightedLoss {
        &self.loss
    }

    fn evaluate(&self, line: &InfiniteLine3d, out: &mut [f64]) {
        match self.camera.project_line(line) {
            Some(image_line) => {
                out[0] = image_line.signed_distance(self.segment.start);
                out[1] = image_line.signed_distance(self.segment.end);
            }
            None => out.fill(self.camera.diagonal()),
        }
    }
}

/// Heatmap response along an observed segment, after snapping it onto the projected line.
///
/// Each residual is `1 - h(q)`, where `q` is a sample of the observed segment projected onto
/// the current image line.
pub struct HeatmapTerm<'a> {
    camera: Camera,
    image: ImageId,
    samples: Vec<Point2<f64>>,
    heatmaps: &'a dyn HeatmapSampler,
    loss: WeightedLoss,
}

impl<'a> HeatmapTerm<'a> {
    pub fn new(
        camera: Camera,
        image: ImageId,
        segment: &Line2d,
        sample_count: usize,
        heatmaps: &'a dyn HeatmapSampler,
        loss: WeightedLoss,
    ) -> Self {
        Self {
            camera,
            image,
            samples: segment.sample_points(sample_count).collect(),
            heatmaps,
            loss,
        }
    }
}

impl<'a> ResidualTerm for HeatmapTerm<'a> {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn category(&self) -> ResidualCategory {
        ResidualCategory::Heatmap
    }

    fn loss(&self) -> &WeightedLoss {
        &self.loss
    }

    fn evaluate(&self, line: &InfiniteLine3d, out: &mut [f64]) {
        let image_line = match self.camera.project_line(line) {
            Some(image_line) => image_line,
            None => return out.fill(1.0),
        };
        for (residual, &sample) in out.iter_mut().zip(&self.samples) {
            let response = self
                .heatmaps
                .sample(self.image, image_line.project_point(sample))
                .unwrap_or(0.0);
            *residual = 1.0 - response;
        }
    }
}

/// One view of a feature consistency term.
#[derive(Debug, Clone, Copy)]
pub struct FeatureView {
    pub image: ImageId,
    pub camera: Camera,
}

/// Photometric consistency of the line between a reference view and another view.
///
/// Points sampled along the reference segment are lifted onto the current 3d line by
/// intersecting their reference rays with it, then projected into both views. The residual is
/// the per-channel difference of the sampled features.
pub struct FeatureTerm<'a> {
    reference: FeatureView,
    target: FeatureView,
    samples: Vec<Point2<f64>>,
    features: &'a dyn FeatureSampler,
    loss: WeightedLoss,
}

impl<'a> FeatureTerm<'a> {
    pub fn new(
        reference: FeatureView,
        reference_segment: &Line2d,
        target: FeatureView,
        sample_count: usize,
        features: &'a dyn FeatureSampler,
        loss: WeightedLoss,
    ) -> Self {
        Self {
            reference,
            target,
            samples: reference_segment.sample_points(sample_count).collect(),
            features,
            loss,
        }
    }

    /// Writes the feature difference of one sample, or returns `false` if it cannot be measured.
    fn sample_difference(&self, line: &InfiniteLine3d, pixel: Point2<f64>, out: &mut [f64]) -> bool {
        let center = self.reference.camera.center();
        let point = match line.closest_point_to_ray(center, self.reference.camera.ray(pixel)) {
            Some(point) => point,
            None => return false,
        };
        let (reference_pixel, target_pixel) = match (
            self.reference.camera.project(point),
            self.target.camera.project(point),
        ) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let channels = out.len();
        let mut reference_feature = vec![0.0; channels];
        if !self
            .features
            .sample_into(self.reference.image, reference_pixel, &mut reference_feature)
            || !self.features.sample_into(self.target.image, target_pixel, out)
        {
            return false;
        }
        for (residual, reference) in out.iter_mut().zip(reference_feature) {
            *residual -= reference;
        }
        true
    }
}

impl<'a> ResidualTerm for FeatureTerm<'a> {
    fn len(&self) -> usize {
        self.samples.len() * self.features.channels()
    }

    fn category(&self) -> ResidualCategory {
        ResidualCategory::Feature
    }

    fn loss(&self) -> &WeightedLoss {
        &self.loss
    }

    fn evaluate(&self, line: &InfiniteLine3d, out: &mut [f64]) {
        let channels = self.features.channels();
        if channels == 0 {
            return;
        }
        for (chunk, &pixel) in out.chunks_mut(channels).zip(&self.samples) {
            if !self.sample_difference(line, pixel, chunk) {
                chunk.fill(0.0);
            }
        }
    }
}

/// Alignment of the line direction with a vanishing direction, as `d × v`.
///
/// The squared norm of the block is the squared sine of the angle between both directions.
#[derive(Debug, Clone)]
pub struct VanishingPointTerm {
    direction: UnitVector3<f64>,
    loss: WeightedLoss,
}

impl VanishingPointTerm {
    pub fn new(direction: UnitVector3<f64>, loss: WeightedLoss) -> Self {
        Self { direction, loss }
    }

    pub fn direction(&self) -> UnitVector3<f64> {
        self.direction
    }
}

impl ResidualTerm for VanishingPointTerm {
    fn len(&self) -> usize {
        3
    }

    fn category(&self) -> ResidualCategory {
        ResidualCategory::VanishingPoint
    }

    fn loss(&self) -> &WeightedLoss {
        &self.loss
    }

    fn evaluate(&self, line: &InfiniteLine3d, out: &mut [f64]) {
        let cross = line.direction().cross(&self.direction);
        out.copy_from_slice(cross.as_slice());
    }
}
