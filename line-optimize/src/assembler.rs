use crate::{
    FeatureSampler, FeatureTerm, FeatureView, HeatmapSampler, HeatmapTerm, ReprojectionTerm,
    ResidualCategory, ResidualTerm, RobustLoss, VanishingPointTerm, VpHint, VpLookup,
    WeightedLoss,
};
use derive_more::{Add, AddAssign};
use line_core::{
    nalgebra::{UnitVector3, Vector3},
    Camera, InfiniteLine3d, Line2d, Observation,
};
use log::trace;
use std::collections::BTreeMap;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The optional cues available to the assembler.
///
/// A `None` cue disables its residual category entirely.
#[derive(Clone, Copy, Default)]
pub struct Cues<'a> {
    pub heatmaps: Option<&'a dyn HeatmapSampler>,
    pub features: Option<&'a dyn FeatureSampler>,
    pub vanishing_points: Option<&'a dyn VpLookup>,
}

impl<'a> Cues<'a> {
    /// No cues, which leaves only reprojection residuals.
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn heatmaps(self, heatmaps: &'a dyn HeatmapSampler) -> Self {
        Self {
            heatmaps: Some(heatmaps),
            ..self
        }
    }

    #[must_use]
    pub fn features(self, features: &'a dyn FeatureSampler) -> Self {
        Self {
            features: Some(features),
            ..self
        }
    }

    #[must_use]
    pub fn vanishing_points(self, vanishing_points: &'a dyn VpLookup) -> Self {
        Self {
            vanishing_points: Some(vanishing_points),
            ..self
        }
    }
}

/// Weights, robust losses and sample counts of every residual category.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CostSettings {
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_reprojection"))]
    pub reprojection: WeightedLoss,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_heatmap"))]
    pub heatmap: WeightedLoss,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_feature"))]
    pub feature: WeightedLoss,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_vanishing_point"))]
    pub vanishing_point: WeightedLoss,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_heatmap_samples"))]
    pub heatmap_samples: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_feature_samples"))]
    pub feature_samples: usize,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            reprojection: default_reprojection(),
            heatmap: default_heatmap(),
            feature: default_feature(),
            vanishing_point: default_vanishing_point(),
            heatmap_samples: default_heatmap_samples(),
            feature_samples: default_feature_samples(),
        }
    }
}

fn default_reprojection() -> WeightedLoss {
    WeightedLoss::new(1.0, RobustLoss::Cauchy { scale: 1.0 })
}

fn default_heatmap() -> WeightedLoss {
    WeightedLoss::new(1.0, RobustLoss::Cauchy { scale: 2.0 })
}

fn default_feature() -> WeightedLoss {
    WeightedLoss::new(1.0, RobustLoss::Cauchy { scale: 2.0 })
}

fn default_vanishing_point() -> WeightedLoss {
    WeightedLoss::new(1.0, RobustLoss::Trivial)
}

fn default_heatmap_samples() -> usize {
    10
}

fn default_feature_samples() -> usize {
    10
}

/// A 2d detection of a track together with the camera of the image it was detected on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedSegment {
    pub observation: Observation,
    pub camera: Camera,
    pub segment: Line2d,
}

/// The number of observations of a track for which an enabled cue had no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Add, AddAssign)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MissingCues {
    pub heatmap: usize,
    pub feature: usize,
    pub vanishing_point: usize,
}

impl MissingCues {
    pub fn total(&self) -> usize {
        self.heatmap + self.feature + self.vanishing_point
    }
}

/// Every residual block of one track.
pub struct TrackResiduals<'a> {
    terms: Vec<Box<dyn ResidualTerm + 'a>>,
    missing: MissingCues,
    len: usize,
}

impl<'a> TrackResiduals<'a> {
    pub fn new(terms: Vec<Box<dyn ResidualTerm + 'a>>, missing: MissingCues) -> Self {
        let len = terms.iter().map(|term| term.len()).sum();
        Self {
            terms,
            missing,
            len,
        }
    }

    pub fn terms(&self) -> &[Box<dyn ResidualTerm + 'a>] {
        &self.terms
    }

    pub fn missing(&self) -> MissingCues {
        self.missing
    }

    /// The total number of residuals over all blocks.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of blocks of the category.
    pub fn count(&self, category: ResidualCategory) -> usize {
        self.terms
            .iter()
            .filter(|term| term.category() == category)
            .count()
    }

    /// Writes every weighted and robustified residual into `out`, which has [`TrackResiduals::len`] elements.
    pub fn evaluate(&self, line: &InfiniteLine3d, out: &mut [f64]) {
        let mut offset = 0;
        for term in &self.terms {
            let block = &mut out[offset..offset + term.len()];
            term.evaluate_weighted(line, block);
            offset += term.len();
        }
    }

    /// The cost `½‖r‖²` of the line.
    pub fn cost(&self, line: &InfiniteLine3d) -> f64 {
        self.cost_where(line, |_| true)
    }

    /// The cost of the line restricted to one category.
    pub fn category_cost(&self, line: &InfiniteLine3d, category: ResidualCategory) -> f64 {
        self.cost_where(line, |term| term.category() == category)
    }

    fn cost_where(&self, line: &InfiniteLine3d, include: impl Fn(&dyn ResidualTerm) -> bool) -> f64 {
        let mut block = Vec::new();
        self.terms
            .iter()
            .filter(|term| include(term.as_ref()))
            .map(|term| {
                block.clear();
                block.resize(term.len(), 0.0);
                term.evaluate_weighted(line, &mut block);
                block.iter().map(|r| r * r).sum::<f64>()
            })
            .sum::<f64>()
            * 0.5
    }
}

/// Composes the residual blocks of a track from its observations and the available cues.
#[derive(Clone, Copy)]
pub struct ResidualAssembler<'a> {
    settings: &'a CostSettings,
    cues: Cues<'a>,
}

impl<'a> ResidualAssembler<'a> {
    pub fn new(settings: &'a CostSettings, cues: Cues<'a>) -> Self {
        Self { settings, cues }
    }

    pub fn assemble(&self, observations: &[ObservedSegment]) -> TrackResiduals<'a> {
        let mut terms: Vec<Box<dyn ResidualTerm + 'a>> = Vec::new();
        let mut missing = MissingCues::default();

        for observed in observations {
            terms.push(Box::new(ReprojectionTerm::new(
                observed.camera,
                observed.segment,
                self.settings.reprojection,
            )));
        }

        if let Some(heatmaps) = self.cues.heatmaps {
            for observed in observations {
                if heatmaps.has_heatmap(observed.observation.image) {
                    terms.push(Box::new(HeatmapTerm::new(
                        observed.camera,
                        observed.observation.image,
                        &observed.segment,
                        self.settings.heatmap_samples,
                        heatmaps,
                        self.settings.heatmap,
                    )));
                } else {
                    missing.heatmap += 1;
                }
            }
        }

        if let Some(features) = self.cues.features {
            missing.feature += self.assemble_features(features, observations, &mut terms);
        }

        if let Some(vanishing_points) = self.cues.vanishing_points {
            let hints: Vec<VpHint> = observations
                .iter()
                .filter_map(|observed| {
                    vanishing_points.hint(observed.observation.image, observed.observation.segment)
                })
                .collect();
            missing.vanishing_point += observations.len() - hints.len();
            if let Some(direction) = majority_direction(&hints) {
                terms.push(Box::new(VanishingPointTerm::new(
                    direction,
                    self.settings.vanishing_point,
                )));
            }
        }

        trace!(
            "assembled {} residual blocks from {} observations",
            terms.len(),
            observations.len()
        );
        TrackResiduals::new(terms, missing)
    }

    /// Adds feature terms between the first observation with features and every other
    /// observation with features on a different image. Returns the observations without features.
    fn assemble_features(
        &self,
        features: &'a dyn FeatureSampler,
        observations: &[ObservedSegment],
        terms: &mut Vec<Box<dyn ResidualTerm + 'a>>,
    ) -> usize {
        let (usable, unusable): (Vec<&ObservedSegment>, Vec<&ObservedSegment>) = observations
            .iter()
            .partition(|observed| features.has_features(observed.observation.image));
        if let Some((reference, others)) = usable.split_first() {
            let reference_view = FeatureView {
                image: reference.observation.image,
                camera: reference.camera,
            };
            for other in others
                .iter()
                .filter(|other| other.observation.image != reference.observation.image)
            {
                terms.push(Box::new(FeatureTerm::new(
                    reference_view,
                    &reference.segment,
                    FeatureView {
                        image: other.observation.image,
                        camera: other.camera,
                    },
                    self.settings.feature_samples,
                    features,
                    self.settings.feature,
                )));
            }
        }
        unusable.len()
    }
}

/// Picks the vanishing point group most hints agree on (the smallest group wins ties) and
/// averages the directions of its hints, ignoring their sign.
///
/// Returns `None` if there are no hints.
pub fn majority_direction(hints: &[VpHint]) -> Option<UnitVector3<f64>> {
    let mut counts = BTreeMap::new();
    for hint in hints {
        *counts.entry(hint.group).or_insert(0usize) += 1;
    }
    let mut majority: Option<(usize, usize)> = None;
    for (&group, &count) in &counts {
        if majority.map_or(true, |(_, best)| count > best) {
            majority = Some((group, count));
        }
    }
    let (group, _) = majority?;
    let mut agreeing = hints.iter().filter(|hint| hint.group == group);
    let first = agreeing.next()?.direction;
    let sum = agreeing.fold(first.into_inner(), |sum: Vector3<f64>, hint| {
        let direction = hint.direction.into_inner();
        if direction.dot(&first) < 0.0 {
            sum - direction
        } else {
            sum + direction
        }
    });
    UnitVector3::try_new(sum, f64::EPSILON)
}
