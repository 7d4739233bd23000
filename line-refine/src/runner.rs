use crate::{
    io::{self, Bundle, LINES_FILE_NAME},
    stage_key, LineRefinement, RefinementError, RefinementSettings, RefinementSummary, Result,
    Stage, StageCache,
};
use line_optimize::{
    CostSettings, FeatureMapStore, FeatureSampler, HeatmapSampler, OptimizerSettings, PatchStore,
    VpLookup,
};
use log::{info, warn};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// The input and output locations of a refinement run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// The bundle folder to refine.
    pub input_folder: PathBuf,
    pub heatmap_folder: Option<PathBuf>,
    pub patch_folder: Option<PathBuf>,
    pub featuremap_folder: Option<PathBuf>,
    pub vp_file: Option<PathBuf>,
    /// Defaults to the parent of the input folder.
    pub output_dir: Option<PathBuf>,
    /// The name of the refined bundle folder inside the output directory.
    pub output_folder: String,
    /// Take the refined tracks from the output bundle if it was refined with the same parameters.
    pub reuse: bool,
}

impl RunConfig {
    pub fn new(input_folder: impl Into<PathBuf>) -> Self {
        Self {
            input_folder: input_folder.into(),
            heatmap_folder: None,
            patch_folder: None,
            featuremap_folder: None,
            vp_file: None,
            output_dir: None,
            output_folder: "newtracks".to_owned(),
            reuse: false,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .input_folder
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_owned(),
        }
    }

    /// The folder the refined bundle is saved to.
    pub fn output_bundle(&self) -> PathBuf {
        self.output_dir().join(&self.output_folder)
    }

    /// The file the visibility-filtered lines are written to.
    pub fn lines_file(&self) -> PathBuf {
        self.output_dir().join(LINES_FILE_NAME)
    }

    /// Checks that every cue enabled in the settings has a source, and that the source exists.
    pub fn validate(&self, settings: &RefinementSettings) -> Result<()> {
        if settings.use_heatmap && self.heatmap_folder.is_none() {
            return Err(RefinementError::MissingCueSource {
                cue: "heatmap",
                flag: "--ht",
            });
        }
        if settings.use_feature && self.patch_folder.is_none() && self.featuremap_folder.is_none() {
            return Err(RefinementError::MissingCueSource {
                cue: "feature",
                flag: "--pt / --ft",
            });
        }
        if settings.use_vp && self.vp_file.is_none() {
            return Err(RefinementError::MissingCueSource {
                cue: "vanishing point",
                flag: "--vp",
            });
        }

        let sources = self.sources(settings);
        let folders = sources
            .heatmaps
            .map(|folder| ("heatmap", "--ht", folder))
            .into_iter()
            .chain(sources.features.map(|source| match source {
                FeatureSource::FeatureMaps(folder) => ("feature map", "--ft", folder),
                FeatureSource::Patches(folder) => ("feature patch", "--pt", folder),
            }));
        for (cue, flag, folder) in folders {
            if !folder.is_dir() {
                return Err(RefinementError::MissingCueFolder {
                    cue,
                    flag,
                    path: folder.to_owned(),
                });
            }
        }
        if let Some(file) = sources.vanishing_points.filter(|file| !file.is_file()) {
            return Err(RefinementError::MissingCueFolder {
                cue: "vanishing point",
                flag: "--vp",
                path: file.to_owned(),
            });
        }
        Ok(())
    }

    /// The cue sources that are actually used with these settings.
    fn sources<'a>(&'a self, settings: &RefinementSettings) -> CueSources<'a> {
        let features = if settings.use_feature {
            match (&self.featuremap_folder, &self.patch_folder) {
                (Some(folder), _) => Some(FeatureSource::FeatureMaps(folder)),
                (None, Some(folder)) => Some(FeatureSource::Patches(folder)),
                (None, None) => None,
            }
        } else {
            None
        };
        CueSources {
            heatmaps: self
                .heatmap_folder
                .as_deref()
                .filter(|_| settings.use_heatmap),
            features,
            vanishing_points: self.vp_file.as_deref().filter(|_| settings.use_vp),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum FeatureSource<'a> {
    FeatureMaps(&'a Path),
    Patches(&'a Path),
}

#[derive(Debug, Clone, Copy, Serialize)]
struct CueSources<'a> {
    heatmaps: Option<&'a Path>,
    features: Option<FeatureSource<'a>>,
    vanishing_points: Option<&'a Path>,
}

/// Everything the refined geometry depends on.
#[derive(Serialize)]
struct RefineKey<'a> {
    input: &'a Path,
    cues: CueSources<'a>,
    cost: &'a CostSettings,
    optimizer: &'a OptimizerSettings,
}

/// What a [`RefinementRunner`] produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The refined bundle, as saved to the output folder.
    pub bundle: Bundle,
    /// `None` if the refinement was reused from a previous run.
    pub summary: Option<RefinementSummary>,
    pub stages: StageCache,
    /// The number of lines that passed the visibility filter.
    pub exported: usize,
}

/// Loads a bundle, refines it and saves the results.
pub struct RefinementRunner {
    config: RunConfig,
    settings: RefinementSettings,
}

impl RefinementRunner {
    pub fn new(config: RunConfig, settings: RefinementSettings) -> Self {
        Self { config, settings }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn settings(&self) -> &RefinementSettings {
        &self.settings
    }

    pub fn run(&self) -> Result<RunOutcome> {
        self.config.validate(&self.settings)?;
        let sources = self.config.sources(&self.settings);
        let mut stages = StageCache::new();

        let input = Bundle::load(&self.config.input_folder)?;
        stages.mark_computed(Stage::Input, stage_key(&self.config.input_folder)?);

        let output_bundle = self.config.output_bundle();
        let refine_key = stage_key(&RefineKey {
            input: &self.config.input_folder,
            cues: sources,
            cost: &self.settings.cost,
            optimizer: &self.settings.optimizer,
        })?;
        let vp_key = sources
            .vanishing_points
            .map(|path| stage_key(&path))
            .transpose()?;

        let (tracks, summary) = match self.reusable(&output_bundle, &refine_key)? {
            Some(previous) => {
                if let Some(key) = vp_key {
                    stages.mark_loaded(Stage::VanishingPoints, key);
                }
                stages.mark_loaded(Stage::Refine, refine_key);
                (previous.tracks, None)
            }
            None => {
                let heatmaps = sources
                    .heatmaps
                    .map(|folder| io::load_heatmaps(folder, &input.images))
                    .transpose()?;
                let features = sources
                    .features
                    .map(|source| load_features(source, &input))
                    .transpose()?;
                let vanishing_points = sources
                    .vanishing_points
                    .map(io::load_vp_association)
                    .transpose()?;
                if let Some(key) = vp_key {
                    stages.mark_computed(Stage::VanishingPoints, key);
                }

                let cues = line_optimize::Cues {
                    heatmaps: heatmaps.as_ref().map(|store| store as &dyn HeatmapSampler),
                    features: features.as_ref().map(Features::sampler),
                    vanishing_points: vanishing_points
                        .as_ref()
                        .map(|association| association as &dyn VpLookup),
                };
                let output = LineRefinement::new(&self.settings, &input.images, &input.segments)
                    .cues(cues)
                    .refine(&input.tracks)?;
                stages.mark_computed(Stage::Refine, refine_key);
                (output.tracks, Some(output.summary))
            }
        };

        let n_visible_views = self
            .settings
            .n_visible_views
            .unwrap_or(input.metadata.n_visible_views);
        let exported = tracks.filter_by_visibility(n_visible_views);
        let output_dir = self.config.output_dir();
        fs::create_dir_all(&output_dir).map_err(RefinementError::io(&output_dir))?;
        let lines_file = self.config.lines_file();
        let exported = io::write_lines(&lines_file, exported.iter())?;
        info!(
            "wrote {} of {} lines visible on at least {} images to {}",
            exported,
            tracks.len(),
            n_visible_views,
            lines_file.display()
        );
        stages.mark_computed(Stage::Export, stage_key(&n_visible_views)?);

        let bundle = Bundle { tracks, ..input };
        bundle.replace_folder(&output_bundle, &stages)?;
        Ok(RunOutcome {
            bundle,
            summary,
            stages,
            exported,
        })
    }

    /// The previous output bundle, if reuse is enabled and it was refined with the same key.
    fn reusable(&self, output_bundle: &Path, refine_key: &str) -> Result<Option<Bundle>> {
        if !self.config.reuse {
            return Ok(None);
        }
        match StageCache::load(output_bundle)? {
            Some(previous) if previous.matches(Stage::Refine, refine_key) => {
                info!("reusing refined tracks from {}", output_bundle.display());
                Bundle::load(output_bundle).map(Some)
            }
            Some(_) => {
                warn!(
                    "{} was refined with other parameters and is recomputed",
                    output_bundle.display()
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

enum Features {
    Maps(FeatureMapStore),
    Patches(PatchStore),
}

impl Features {
    fn sampler(&self) -> &dyn FeatureSampler {
        match self {
            Self::Maps(maps) => maps,
            Self::Patches(patches) => patches,
        }
    }
}

fn load_features(source: FeatureSource, bundle: &Bundle) -> Result<Features> {
    match source {
        FeatureSource::FeatureMaps(folder) => {
            io::load_feature_maps(folder, &bundle.images).map(Features::Maps)
        }
        FeatureSource::Patches(folder) => {
            io::load_patches(folder, &bundle.images).map(Features::Patches)
        }
    }
}
