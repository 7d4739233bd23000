//! # Line Optimize
//!
//! Pixel-wise refinement of individual 3d line tracks.
//!
//! A track is refined by composing residual blocks from its 2d observations and whichever
//! optional [cues] are available, and then running Levenberg-Marquardt over the 4 coordinates
//! of a [`LineChart`](line_core::LineChart) centered on the current line estimate.
//!
//! * [`ReprojectionTerm`] - always present, the distance of observed endpoints to the projected line
//! * [`HeatmapTerm`] - line likelihood along the observation, if a heatmap exists for the image
//! * [`FeatureTerm`] - feature consistency between a reference view and every other view
//! * [`VanishingPointTerm`] - alignment with the vanishing direction most observations agree on
//!
//! Every block is weighted and robustified per category according to [`CostSettings`].

pub mod cues;

mod assembler;
mod loss;
mod residual;
mod track_optimizer;

pub use assembler::*;
pub use cues::*;
pub use loss::*;
pub use residual::*;
pub use track_optimizer::*;

/// Assembles the residuals of a track and optimizes its line.
///
/// This is the whole refinement of a single track, which is independent of every other track.
pub fn refine_track(
    assembler: &ResidualAssembler,
    optimizer: &TrackOptimizer,
    line: line_core::InfiniteLine3d,
    center: line_core::nalgebra::Point3<f64>,
    observations: &[ObservedSegment],
) -> (TrackOutcome, MissingCues) {
    let residuals = assembler.assemble(observations);
    let outcome = optimizer.optimize(
        line,
        center,
        &residuals,
        TrackOptimizer::distinct_images(observations),
    );
    (outcome, residuals.missing())
}
