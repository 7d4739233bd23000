use approx::assert_relative_eq;
use levenberg_marquardt::LeastSquaresProblem;
use line_core::{
    nalgebra::{IsometryMatrix3, Point2, Point3, Vector2, Vector3, Vector4},
    Camera, CameraIntrinsics, ImageId, InfiniteLine3d, Line2d, LineChart, Observation,
    WorldToCamera,
};
use line_optimize::{
    refine_track, CostSettings, Cues, FeatureMap, FeatureMapStore, Heatmap, HeatmapStore,
    MissingCues, ObservedSegment, ResidualAssembler, ResidualCategory, ResidualTerm,
    TrackOptimizer, TrackProblem, TrackResiduals, TrackStatus, VpAssociation, VpHint,
    WeightedLoss,
};
use ndarray::{Array2, Array3};
use rand::{rngs::SmallRng, Rng, SeedableRng};

const START: [f64; 3] = [-1.0, 0.2, 0.0];
const END: [f64; 3] = [1.0, -0.3, 0.4];
const CAMERA_DISTANCE: f64 = 5.0;

fn truth() -> InfiniteLine3d {
    InfiniteLine3d::from_points(START.into(), END.into()).unwrap()
}

fn center() -> Point3<f64> {
    line_core::nalgebra::center(&Point3::from(START), &Point3::from(END))
}

/// A camera on a circle around the origin, looking at it.
fn camera(angle: f64) -> Camera {
    let eye = Point3::new(
        CAMERA_DISTANCE * angle.sin(),
        0.5,
        -CAMERA_DISTANCE * angle.cos(),
    );
    let camera_to_world = IsometryMatrix3::face_towards(&eye, &Point3::origin(), &Vector3::y());
    Camera::new(
        CameraIntrinsics::identity()
            .focal(500.0)
            .principal_point(Point2::new(320.0, 240.0)),
        WorldToCamera(camera_to_world.inverse()),
        640,
        480,
    )
}

/// Observations of the ground truth line, trimmed and with optional pixel noise on the endpoints.
fn observe(angles: &[f64], noise: f64, rng: &mut SmallRng) -> Vec<ObservedSegment> {
    let start = Point3::from(START);
    let end = Point3::from(END);
    angles
        .iter()
        .enumerate()
        .map(|(ix, &angle)| {
            let camera = camera(angle);
            let mut jitter =
                || Vector2::new(rng.gen_range(-noise..=noise), rng.gen_range(-noise..=noise));
            let a = camera.project(start + 0.1 * (end - start)).unwrap() + jitter();
            let b = camera.project(start + 0.9 * (end - start)).unwrap() + jitter();
            ObservedSegment {
                observation: Observation::new(ImageId(ix), 0),
                camera,
                segment: Line2d::new(a, b),
            }
        })
        .collect()
}

fn perturbed(rng: &mut SmallRng, magnitude: f64) -> InfiniteLine3d {
    let mut offset = || {
        Vector3::new(
            rng.gen_range(-magnitude..=magnitude),
            rng.gen_range(-magnitude..=magnitude),
            rng.gen_range(-magnitude..=magnitude),
        )
    };
    let a = Point3::from(START) + offset();
    let b = Point3::from(END) + offset();
    InfiniteLine3d::from_points(a, b).unwrap()
}

fn max_reprojection_error(line: &InfiniteLine3d, observations: &[ObservedSegment]) -> f64 {
    observations
        .iter()
        .flat_map(|observed| {
            let image_line = observed.camera.project_line(line).unwrap();
            [
                image_line.signed_distance(observed.segment.start).abs(),
                image_line.signed_distance(observed.segment.end).abs(),
            ]
        })
        .fold(0.0, f64::max)
}

fn assert_same_line(a: &InfiniteLine3d, b: &InfiniteLine3d, epsilon: f64) {
    assert_relative_eq!(a.direction().dot(&b.direction()).abs(), 1.0, epsilon = epsilon);
    assert!(a.distance_to_point(b.foot()) < epsilon);
}

/// Residuals that only have a value on one line, like a cue that has no data anywhere else.
struct DefinedOnlyOn {
    line: InfiniteLine3d,
    loss: WeightedLoss,
}

impl DefinedOnlyOn {
    fn residuals(line: InfiniteLine3d) -> TrackResiduals<'static> {
        let term: Box<dyn ResidualTerm> = Box::new(Self {
            line,
            loss: WeightedLoss::default(),
        });
        TrackResiduals::new(vec![term], MissingCues::default())
    }
}

impl ResidualTerm for DefinedOnlyOn {
    fn len(&self) -> usize {
        4
    }

    fn category(&self) -> ResidualCategory {
        ResidualCategory::Heatmap
    }

    fn loss(&self) -> &WeightedLoss {
        &self.loss
    }

    fn evaluate(&self, line: &InfiniteLine3d, out: &mut [f64]) {
        let on_line = [0.0, 1.0]
            .iter()
            .all(|&s| line.distance_to_point(self.line.point_at(s)) < 1e-9);
        out.fill(if on_line { 1.0 } else { f64::NAN });
    }
}

#[test]
fn exact_track_is_a_fixed_point() {
    let mut rng = SmallRng::seed_from_u64(0);
    let observations = observe(&[-0.4, 0.1, 0.6], 0.0, &mut rng);
    let settings = CostSettings::default();
    let assembler = ResidualAssembler::new(&settings, Cues::none());
    let (outcome, _) = refine_track(
        &assembler,
        &TrackOptimizer::default(),
        truth(),
        center(),
        &observations,
    );
    assert!(outcome.initial_cost < 1e-16);
    assert!(outcome.final_cost <= outcome.initial_cost);
    assert_same_line(&outcome.line, &truth(), 1e-9);
}

#[test]
fn two_view_track_converges_to_ground_truth() {
    let mut rng = SmallRng::seed_from_u64(1);
    let observations = observe(&[-0.5, 0.4], 0.0, &mut rng);
    let start = perturbed(&mut rng, 0.1);
    assert!(max_reprojection_error(&start, &observations) > 1.0);

    let settings = CostSettings::default();
    let assembler = ResidualAssembler::new(&settings, Cues::none());
    let (outcome, _) = refine_track(
        &assembler,
        &TrackOptimizer::default(),
        start,
        center(),
        &observations,
    );
    assert!(outcome.status.is_updated(), "{:?}", outcome.status);
    assert!(max_reprojection_error(&outcome.line, &observations) < 0.1);
    assert_same_line(&outcome.line, &truth(), 1e-6);
}

#[test]
fn reprojection_cost_never_increases() {
    let mut rng = SmallRng::seed_from_u64(2);
    let settings = CostSettings::default();
    let assembler = ResidualAssembler::new(&settings, Cues::none());
    let optimizer = TrackOptimizer::default();
    for _ in 0..20 {
        let observations = observe(&[-0.6, -0.2, 0.3, 0.7], 1.5, &mut rng);
        let start = perturbed(&mut rng, 0.2);
        let residuals = assembler.assemble(&observations);
        let outcome = optimizer.optimize(start, center(), &residuals, 4);
        assert!(
            outcome.final_cost <= outcome.initial_cost,
            "{} > {}",
            outcome.final_cost,
            outcome.initial_cost
        );
        assert_relative_eq!(
            residuals.cost(&outcome.line),
            outcome.final_cost,
            max_relative = 1e-12
        );
    }
}

#[test]
fn single_image_track_is_skipped() {
    let mut rng = SmallRng::seed_from_u64(3);
    let mut observations = observe(&[-0.3, 0.3], 0.0, &mut rng);
    // Two detections on the same image still only make one view.
    observations[1].observation.image = observations[0].observation.image;
    let start = perturbed(&mut rng, 0.05);
    let settings = CostSettings::default();
    let (outcome, _) = refine_track(
        &ResidualAssembler::new(&settings, Cues::none()),
        &TrackOptimizer::default(),
        start,
        center(),
        &observations,
    );
    assert_eq!(outcome.status, TrackStatus::Skipped);
    assert_eq!(outcome.line, start);
    assert_eq!(outcome.evaluations, 0);
}

#[test]
fn failed_solve_keeps_the_line_unrefined() {
    let start = truth();
    let residuals = DefinedOnlyOn::residuals(start);
    assert!(residuals.cost(&start).is_finite());

    let outcome = TrackOptimizer::default().optimize(start, center(), &residuals, 4);
    assert_eq!(outcome.status, TrackStatus::Unrefined);
    assert!(!outcome.status.is_updated());
    assert_eq!(outcome.line, start);
    assert_eq!(outcome.final_cost, outcome.initial_cost);
    assert!(!outcome.degenerate);
}

#[test]
fn non_finite_start_is_unrefined_without_solving() {
    let mut rng = SmallRng::seed_from_u64(4);
    let start = perturbed(&mut rng, 0.05);
    let residuals = DefinedOnlyOn::residuals(truth());
    assert!(!residuals.cost(&start).is_finite());

    let outcome = TrackOptimizer::default().optimize(start, center(), &residuals, 4);
    assert_eq!(outcome.status, TrackStatus::Unrefined);
    assert_eq!(outcome.line, start);
    assert_eq!(outcome.evaluations, 0);
}

#[test]
fn invalid_steps_are_penalized() {
    let mut rng = SmallRng::seed_from_u64(5);
    let observations = observe(&[-0.4, 0.3], 0.0, &mut rng);
    let settings = CostSettings::default();
    let residuals = ResidualAssembler::new(&settings, Cues::none()).assemble(&observations);
    let mut problem = TrackProblem::new(&residuals, LineChart::centered_at(truth(), center()));
    assert!(problem.line().is_some());
    assert!(problem.jacobian().is_some());
    let valid = problem.residuals().unwrap();
    assert!(valid.iter().all(|r| r.abs() < 1e-6));

    problem.set_params(&Vector4::new(f64::NAN, 0.0, 0.0, 0.0));
    assert!(problem.line().is_none());
    let invalid = problem.residuals().unwrap();
    assert_eq!(invalid.len(), residuals.len());
    assert!(invalid.iter().all(|&r| r >= 1e8), "{:?}", invalid);
    assert!(problem.jacobian().is_none());

    problem.set_params(&Vector4::zeros());
    assert_same_line(&problem.line().unwrap(), &truth(), 1e-12);
}

#[test]
fn absent_heatmaps_match_empty_heatmap_store() {
    let mut rng = SmallRng::seed_from_u64(4);
    let observations = observe(&[-0.5, 0.0, 0.5], 1.0, &mut rng);
    let start = perturbed(&mut rng, 0.1);
    let settings = CostSettings::default();
    let optimizer = TrackOptimizer::default();

    let empty = HeatmapStore::new();
    let (absent, absent_missing) = refine_track(
        &ResidualAssembler::new(&settings, Cues::none()),
        &optimizer,
        start,
        center(),
        &observations,
    );
    let (unavailable, unavailable_missing) = refine_track(
        &ResidualAssembler::new(&settings, Cues::none().heatmaps(&empty)),
        &optimizer,
        start,
        center(),
        &observations,
    );
    assert_eq!(absent, unavailable);
    assert_eq!(absent_missing.heatmap, 0);
    assert_eq!(unavailable_missing.heatmap, observations.len());
}

#[test]
fn heatmaps_guide_noisy_observations() {
    let angles = [-0.5, 0.0, 0.5];
    let mut rng = SmallRng::seed_from_u64(5);
    let observations = observe(&angles, 2.0, &mut rng);
    let sigma = 2.0;
    let heatmaps: HeatmapStore = observations
        .iter()
        .map(|observed| {
            let image_line = observed.camera.project_line(&truth()).unwrap();
            let heatmap = Array2::from_shape_fn((480, 640), |(y, x)| {
                let d = image_line.signed_distance(Point2::new(x as f64, y as f64));
                (-d * d / (2.0 * sigma * sigma)).exp() as f32
            });
            (observed.observation.image, Heatmap(heatmap))
        })
        .collect();

    let mut settings = CostSettings::default();
    settings.heatmap.weight = 100.0;
    let (outcome, missing) = refine_track(
        &ResidualAssembler::new(&settings, Cues::none().heatmaps(&heatmaps)),
        &TrackOptimizer::default(),
        perturbed(&mut rng, 0.02),
        center(),
        &observations,
    );
    assert_eq!(missing.heatmap, 0);
    assert!(outcome.status.is_updated(), "{:?}", outcome.status);
    assert!(outcome.final_cost <= outcome.initial_cost);

    // The heatmaps agree on the true line, so it ends up closer than the noisy detections allow.
    let truth_error: f64 = observations
        .iter()
        .map(|observed| {
            let refined = observed.camera.project_line(&outcome.line).unwrap();
            let expected = observed.camera.project_line(&truth()).unwrap();
            observed
                .segment
                .sample_points(5)
                .map(|p| refined.signed_distance(expected.project_point(p)).abs())
                .fold(0.0, f64::max)
        })
        .fold(0.0, f64::max);
    assert!(truth_error < 1.0, "{}", truth_error);
}

#[test]
fn feature_terms_pair_reference_with_other_views() {
    let mut rng = SmallRng::seed_from_u64(6);
    let observations = observe(&[-0.5, 0.0, 0.5], 0.0, &mut rng);
    let mut features = FeatureMapStore::new(3);
    for image in [ImageId(0), ImageId(2)] {
        features
            .insert(image, FeatureMap::new(Array3::from_elem((480, 640, 3), 0.5)))
            .unwrap();
    }
    let settings = CostSettings::default();
    let residuals =
        ResidualAssembler::new(&settings, Cues::none().features(&features)).assemble(&observations);
    assert_eq!(residuals.count(ResidualCategory::Feature), 1);
    assert_eq!(residuals.missing().feature, 1);
    assert_eq!(
        residuals.len(),
        observations.len() * 2 + settings.feature_samples * 3
    );
    assert_relative_eq!(
        residuals.category_cost(&truth(), ResidualCategory::Feature),
        0.0
    );
}

#[test]
fn vanishing_point_majority_ignores_dissenters() {
    let mut rng = SmallRng::seed_from_u64(7);
    let observations = observe(&[-0.5, 0.0, 0.5], 0.0, &mut rng);
    let agreeing = VpHint {
        group: 0,
        direction: truth().direction(),
    };
    let dissenting = VpHint {
        group: 1,
        direction: Vector3::y_axis(),
    };
    let association: VpAssociation = vec![
        (ImageId(0), vec![Some(agreeing)]),
        (ImageId(1), vec![Some(dissenting)]),
        (ImageId(2), vec![Some(agreeing)]),
    ]
    .into_iter()
    .collect();
    let settings = CostSettings::default();
    let residuals = ResidualAssembler::new(&settings, Cues::none().vanishing_points(&association))
        .assemble(&observations);
    assert_eq!(residuals.count(ResidualCategory::VanishingPoint), 1);
    assert_eq!(residuals.missing().vanishing_point, 0);
    assert!(residuals.category_cost(&truth(), ResidualCategory::VanishingPoint) < 1e-20);
    assert!(residuals.category_cost(&perturbed(&mut rng, 0.3), ResidualCategory::VanishingPoint) > 0.0);
}
