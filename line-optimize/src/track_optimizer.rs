use crate::{ObservedSegment, TrackResiduals};
use itertools::Itertools;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use line_core::{
    nalgebra::{
        dimension::{Const, Dynamic, U1, U4},
        storage::Owned,
        DVector, OMatrix, Point3, VecStorage, Vector4,
    },
    InfiniteLine3d, LineChart,
};
use log::{debug, trace};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Every residual of a trial step that leaves the space of valid lines takes this value,
/// which makes the step costlier than any valid one.
const INVALID_STEP_RESIDUAL: f64 = 1e8;

/// Relative step of the central differences of the Jacobian.
const DIFFERENCE_STEP: f64 = 1e-6;

/// Settings of the per-track Levenberg-Marquardt solve.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct OptimizerSettings {
    /// Tracks observed on fewer distinct images than this are not refined.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_images"))]
    pub min_images: usize,
    /// The solve gives up after `patience * 5` residual evaluations.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_patience"))]
    pub patience: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_ftol"))]
    pub ftol: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_xtol"))]
    pub xtol: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_gtol"))]
    pub gtol: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_stepbound"))]
    pub stepbound: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            min_images: default_min_images(),
            patience: default_patience(),
            ftol: default_ftol(),
            xtol: default_xtol(),
            gtol: default_gtol(),
            stepbound: default_stepbound(),
        }
    }
}

fn default_min_images() -> usize {
    2
}

fn default_patience() -> usize {
    100
}

fn default_ftol() -> f64 {
    1e-12
}

fn default_xtol() -> f64 {
    1e-12
}

fn default_gtol() -> f64 {
    0.0
}

fn default_stepbound() -> f64 {
    100.0
}

/// What happened to a track during optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum TrackStatus {
    /// The solve converged and the line was updated.
    Refined,
    /// The evaluation cap was hit with an improved cost, and the line was updated.
    Stalled,
    /// The solve failed or made the cost worse, and the previous line was kept.
    Unrefined,
    /// The track is not observable or has no residuals, and the previous line was kept.
    Skipped,
}

impl TrackStatus {
    /// Checks if the line of the track was replaced.
    pub fn is_updated(self) -> bool {
        matches!(self, Self::Refined | Self::Stalled)
    }
}

/// The result of optimizing one track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackOutcome {
    pub line: InfiniteLine3d,
    pub status: TrackStatus,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub evaluations: usize,
    /// The solver ended on chart coordinates that do not produce a valid line.
    pub degenerate: bool,
}

impl TrackOutcome {
    fn unchanged(line: InfiniteLine3d, status: TrackStatus, cost: f64, evaluations: usize) -> Self {
        Self {
            line,
            status,
            initial_cost: cost,
            final_cost: cost,
            evaluations,
            degenerate: false,
        }
    }
}

/// The least squares problem of one track over the coordinates of a [`LineChart`].
pub struct TrackProblem<'r, 'a> {
    residuals: &'r TrackResiduals<'a>,
    chart: LineChart,
    delta: Vector4<f64>,
}

impl<'r, 'a> TrackProblem<'r, 'a> {
    pub fn new(residuals: &'r TrackResiduals<'a>, chart: LineChart) -> Self {
        Self {
            residuals,
            chart,
            delta: Vector4::zeros(),
        }
    }

    /// The line at the current chart coordinates, or `None` if they do not produce a valid line.
    pub fn line(&self) -> Option<InfiniteLine3d> {
        self.chart.retract(&self.delta)
    }

    fn residuals_at(&self, delta: &Vector4<f64>) -> DVector<f64> {
        let mut residuals = DVector::zeros(self.residuals.len());
        match self.chart.retract(delta) {
            Some(line) => self.residuals.evaluate(&line, residuals.as_mut_slice()),
            None => residuals.fill(INVALID_STEP_RESIDUAL),
        }
        residuals
    }
}

impl<'r, 'a> LeastSquaresProblem<f64, Dynamic, U4> for TrackProblem<'r, 'a> {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, U4>;
    type ParameterStorage = Owned<f64, U4>;

    fn set_params(&mut self, x: &Vector4<f64>) {
        self.delta = *x;
    }

    fn params(&self) -> Vector4<f64> {
        self.delta
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.delta))
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dynamic, U4>> {
        let rows = Dynamic::new(self.residuals.len());
        let mut jacobian = OMatrix::<f64, Dynamic, U4>::zeros_generic(rows, Const::<4>);
        for ix in 0..4 {
            let step = DIFFERENCE_STEP * self.delta[ix].abs().max(1.0);
            let mut forward = self.delta;
            forward[ix] += step;
            let mut backward = self.delta;
            backward[ix] -= step;
            // A central difference that straddles an invalid step is meaningless.
            self.chart.retract(&forward)?;
            self.chart.retract(&backward)?;
            let column = (self.residuals_at(&forward) - self.residuals_at(&backward)) / (2.0 * step);
            jacobian.set_column(ix, &column);
        }
        Some(jacobian)
    }
}

/// Refines the 3d line of individual tracks with Levenberg-Marquardt.
#[derive(Debug, Clone, Default)]
pub struct TrackOptimizer {
    settings: OptimizerSettings,
}

impl TrackOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// The number of distinct images among the observations.
    pub fn distinct_images(observations: &[ObservedSegment]) -> usize {
        observations
            .iter()
            .map(|observed| observed.observation.image)
            .unique()
            .count()
    }

    /// Optimizes the line of a track.
    ///
    /// The chart is anchored at the point of the line closest to `center`, which should be near
    /// the observed part of the line. The previous line is returned unless the solve succeeds
    /// without increasing the cost.
    pub fn optimize(
        &self,
        line: InfiniteLine3d,
        center: Point3<f64>,
        residuals: &TrackResiduals,
        distinct_images: usize,
    ) -> TrackOutcome {
        let initial_cost = residuals.cost(&line);
        if distinct_images < self.settings.min_images || residuals.is_empty() {
            trace!(
                "skipping track seen on {} images with {} residuals",
                distinct_images,
                residuals.len()
            );
            return TrackOutcome::unchanged(line, TrackStatus::Skipped, initial_cost, 0);
        }
        if !initial_cost.is_finite() {
            debug!("track starts with a non-finite cost, keeping it unrefined");
            return TrackOutcome::unchanged(line, TrackStatus::Unrefined, initial_cost, 0);
        }

        let problem = TrackProblem::new(residuals, LineChart::centered_at(line, center));
        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(self.settings.patience)
            .with_ftol(self.settings.ftol)
            .with_xtol(self.settings.xtol)
            .with_gtol(self.settings.gtol)
            .with_stepbound(self.settings.stepbound)
            .minimize(problem);
        let evaluations = report.number_of_evaluations;

        let candidate = match problem.line() {
            Some(candidate) => candidate,
            None => {
                debug!("Levenberg-Marquardt ended on a degenerate line");
                return TrackOutcome {
                    degenerate: true,
                    ..TrackOutcome::unchanged(line, TrackStatus::Unrefined, initial_cost, evaluations)
                };
            }
        };
        let final_cost = residuals.cost(&candidate);
        let improved = final_cost.is_finite() && final_cost <= initial_cost;
        let status = match report.termination {
            TerminationReason::Converged { .. }
            | TerminationReason::ResidualsZero
            | TerminationReason::Orthogonal
                if improved =>
            {
                TrackStatus::Refined
            }
            TerminationReason::LostPatience if improved && final_cost < initial_cost => {
                TrackStatus::Stalled
            }
            _ => TrackStatus::Unrefined,
        };
        debug!(
            "Levenberg-Marquardt terminated with reason {:?} after {} evaluations, cost {} -> {}",
            report.termination, evaluations, initial_cost, final_cost
        );

        if status.is_updated() {
            TrackOutcome {
                line: candidate,
                status,
                initial_cost,
                final_cost,
                evaluations,
                degenerate: false,
            }
        } else {
            TrackOutcome::unchanged(line, status, initial_cost, evaluations)
        }
    }
}
