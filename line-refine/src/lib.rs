//! # Line Refine
//!
//! Multi-view refinement of a bundle of 3d line tracks.
//!
//! Every track is refined independently by [`line_optimize`], using the cameras and 2d
//! segments of the bundle and whichever cues were loaded. Once a track's infinite line is
//! refined, its endpoints are rebuilt by lifting the endpoints of its observations onto the
//! refined line and keeping the extremal span.
//!
//! [`RefinementRunner`] is the whole command-level flow: it loads a bundle folder and its
//! cues, refines, writes the visibility-filtered lines and saves the refined bundle.

mod error;
mod images;
pub mod io;
mod runner;
mod settings;
mod stage;
mod track;

pub use error::*;
pub use images::*;
pub use runner::*;
pub use settings::*;
pub use stage::*;
pub use track::*;

use line_core::{InfiniteLine3d, Line3d, TrackId};
use line_optimize::{
    refine_track, Cues, MissingCues, ObservedSegment, ResidualAssembler, TrackOptimizer,
    TrackOutcome, TrackStatus,
};
use log::{debug, info};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// The smallest span a rebuilt segment may have.
const MIN_SEGMENT_LENGTH: f64 = 1e-9;

/// What happened to one track during refinement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackReport {
    pub id: TrackId,
    /// The optimizer result, or `None` if the input segment was not a valid line.
    pub outcome: Option<TrackOutcome>,
    pub missing: MissingCues,
    /// The solver ended on an invalid line, or no valid segment could be rebuilt on the refined one.
    pub degenerate: bool,
}

impl TrackReport {
    pub fn status(&self) -> TrackStatus {
        self.outcome
            .map_or(TrackStatus::Skipped, |outcome| outcome.status)
    }
}

/// Counts of what happened over all tracks of a refinement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefinementSummary {
    pub refined: usize,
    pub stalled: usize,
    pub unrefined: usize,
    pub skipped: usize,
    /// Tracks whose line was replaced by the refined one.
    pub updated: usize,
    pub degenerate: usize,
    /// Tracks with at least one observation for which an enabled cue had no data.
    pub tracks_missing_cues: usize,
    pub missing: MissingCues,
    pub evaluations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
}

impl RefinementSummary {
    pub fn from_reports(reports: &[TrackReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match report.status() {
                TrackStatus::Refined => summary.refined += 1,
                TrackStatus::Stalled => summary.stalled += 1,
                TrackStatus::Unrefined => summary.unrefined += 1,
                TrackStatus::Skipped => summary.skipped += 1,
            }
            if report.degenerate {
                summary.degenerate += 1;
            } else if report.status().is_updated() {
                summary.updated += 1;
            }
            if report.missing.total() > 0 {
                summary.tracks_missing_cues += 1;
            }
            summary.missing += report.missing;
            if let Some(outcome) = report.outcome {
                summary.evaluations += outcome.evaluations;
                summary.initial_cost += outcome.initial_cost;
                summary.final_cost += outcome.final_cost;
            }
        }
        summary
    }

    pub fn log(&self) {
        info!(
            "refined {} tracks, stalled {}, unrefined {}, skipped {}, degenerate {}, updated {}",
            self.refined, self.stalled, self.unrefined, self.skipped, self.degenerate, self.updated
        );
        info!(
            "cost went from {} to {} in {} evaluations",
            self.initial_cost, self.final_cost, self.evaluations
        );
        if self.missing.total() > 0 {
            info!(
                "{} tracks have observations without cue data: {} heatmap, {} feature, {} vanishing point",
                self.tracks_missing_cues,
                self.missing.heatmap,
                self.missing.feature,
                self.missing.vanishing_point
            );
        }
    }
}

/// Every track after refinement, in input order, together with what happened to it.
#[derive(Debug, Clone)]
pub struct RefinementOutput {
    pub tracks: TrackStore,
    pub reports: Vec<TrackReport>,
    pub summary: RefinementSummary,
}

/// Refines the tracks of one bundle.
pub struct LineRefinement<'a> {
    settings: &'a RefinementSettings,
    images: &'a ImageCollection,
    segments: &'a SegmentStore,
    cues: Cues<'a>,
}

impl<'a> LineRefinement<'a> {
    /// Creates a refinement which uses no cues.
    pub fn new(
        settings: &'a RefinementSettings,
        images: &'a ImageCollection,
        segments: &'a SegmentStore,
    ) -> Self {
        Self {
            settings,
            images,
            segments,
            cues: Cues::none(),
        }
    }

    pub fn cues(self, cues: Cues<'a>) -> Self {
        Self { cues, ..self }
    }

    /// Resolves the observations of a track against the bundle.
    ///
    /// Observations of unknown images or segments are left out, which only happens
    /// for tracks that were never validated.
    pub fn observed_segments(&self, track: &LineTrack) -> Vec<ObservedSegment> {
        track
            .observations()
            .iter()
            .filter_map(|&observation| {
                Some(ObservedSegment {
                    observation,
                    camera: *self.images.camera(observation.image)?,
                    segment: self.segments.segment(observation)?,
                })
            })
            .collect()
    }

    /// Refines every track.
    ///
    /// With the `rayon` feature the tracks are spread over `num_jobs` worker threads.
    /// The result does not depend on the number of threads.
    pub fn refine(&self, tracks: &TrackStore) -> Result<RefinementOutput> {
        let assembler = ResidualAssembler::new(&self.settings.cost, self.cues);
        let optimizer = TrackOptimizer::new(self.settings.optimizer.clone());
        info!("refining {} tracks", tracks.len());

        #[cfg(not(feature = "rayon"))]
        let refined: Vec<(LineTrack, TrackReport)> = tracks
            .iter()
            .map(|track| self.refine_one(track, &assembler, &optimizer))
            .collect();
        #[cfg(feature = "rayon")]
        let refined: Vec<(LineTrack, TrackReport)> = {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.settings.num_jobs.unwrap_or(0))
                .build()?;
            pool.install(|| {
                tracks
                    .tracks()
                    .par_iter()
                    .map(|track| self.refine_one(track, &assembler, &optimizer))
                    .collect()
            })
        };

        let (refined_tracks, reports): (Vec<_>, Vec<_>) = refined.into_iter().unzip();
        let summary = RefinementSummary::from_reports(&reports);
        summary.log();
        Ok(RefinementOutput {
            tracks: TrackStore::from_tracks(refined_tracks)?,
            reports,
            summary,
        })
    }

    fn refine_one(
        &self,
        track: &LineTrack,
        assembler: &ResidualAssembler,
        optimizer: &TrackOptimizer,
    ) -> (LineTrack, TrackReport) {
        let mut report = TrackReport {
            id: track.id(),
            outcome: None,
            missing: MissingCues::default(),
            degenerate: false,
        };
        let line = match track.line().infinite() {
            Some(line) => line,
            None => {
                debug!("track {} has a degenerate segment and is skipped", track.id());
                return (track.clone(), report);
            }
        };
        let observations = self.observed_segments(track);
        let (outcome, missing) = refine_track(
            assembler,
            optimizer,
            line,
            track.line().midpoint(),
            &observations,
        );
        report.outcome = Some(outcome);
        report.missing = missing;
        report.degenerate = outcome.degenerate;

        let mut refined = track.clone();
        if outcome.status.is_updated() {
            match lift_segment(&outcome.line, &observations) {
                Some(segment) => refined.set_line(segment),
                None => {
                    debug!("track {} has no valid segment on its refined line", track.id());
                    report.degenerate = true;
                }
            }
        }
        (refined, report)
    }
}

/// Rebuilds a segment on the line from the extremal span of the observation endpoints.
///
/// Every endpoint is lifted to the point of the line closest to its viewing ray. Endpoints
/// whose ray is parallel to the line or meets it behind the camera are ignored.
pub fn lift_segment(line: &InfiniteLine3d, observations: &[ObservedSegment]) -> Option<Line3d> {
    let (min, max) = observations
        .iter()
        .flat_map(|observed| {
            let camera = observed.camera;
            [observed.segment.start, observed.segment.end]
                .into_iter()
                .filter_map(move |pixel| {
                    line.closest_parameters_to_ray(camera.center(), camera.ray(pixel))
                })
        })
        .filter(|&(s, u)| s.is_finite() && u > 0.0)
        .fold(None, |span: Option<(f64, f64)>, (s, _)| {
            Some(span.map_or((s, s), |(min, max)| (min.min(s), max.max(s))))
        })?;
    if max - min < MIN_SEGMENT_LENGTH {
        return None;
    }
    Some(Line3d::from_infinite_span(line, min, max))
}
