use line_refine::{RefinementRunner, RefinementSettings, RunConfig};
use log::*;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(
    name = "line-refine",
    about = "Refines a bundle of 3d line tracks with pixel-wise optimization"
)]
struct Opt {
    /// The bundle folder with the tracks, images and segments to refine.
    #[structopt(short, long, parse(from_os_str))]
    input_folder: PathBuf,
    /// Folder of `<image id>.png` line heatmaps.
    #[structopt(long = "ht", visible_alias = "heatmap-folder", parse(from_os_str))]
    heatmap_folder: Option<PathBuf>,
    /// Folder of `<image id>.bin` feature patches.
    #[structopt(long = "pt", visible_alias = "patch-folder", parse(from_os_str))]
    patch_folder: Option<PathBuf>,
    /// Folder of `<image id>.bin` dense feature maps, used instead of patches if given.
    #[structopt(long = "ft", visible_alias = "featuremap-folder", parse(from_os_str))]
    featuremap_folder: Option<PathBuf>,
    /// JSON file with the vanishing point of every segment.
    #[structopt(long = "vp", visible_alias = "vp-file", parse(from_os_str))]
    vp_file: Option<PathBuf>,
    /// The file where settings are specified.
    ///
    /// This is in the format of `line_refine::RefinementSettings`. Default settings are used
    /// if this is not given.
    #[structopt(short, long = "config-file", parse(from_os_str))]
    config_file: Option<PathBuf>,
    /// Only export lines visible on at least this many images.
    ///
    /// Defaults to the value in the bundle metadata.
    #[structopt(long = "nv", visible_alias = "n-visible-views")]
    n_visible_views: Option<usize>,
    /// The number of worker threads, which defaults to one per core.
    #[structopt(short = "j", long)]
    num_jobs: Option<usize>,
    /// The directory to write to, which defaults to the parent of the input folder.
    #[structopt(long, parse(from_os_str))]
    output_dir: Option<PathBuf>,
    /// The name of the refined bundle folder in the output directory.
    #[structopt(long, default_value = "newtracks")]
    output_folder: String,
    /// Reuse the refined bundle in the output folder if it was refined with the same parameters.
    #[structopt(long)]
    reuse: bool,
}

fn load_settings(path: Option<&PathBuf>) -> Result<RefinementSettings, String> {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| format!("unable to open settings {}: {}", path.display(), e))?;
            let settings = serde_json::from_reader(file)
                .map_err(|e| format!("invalid settings in {}: {}", path.display(), e))?;
            info!("loaded settings from {}", path.display());
            Ok(settings)
        }
        None => {
            info!("used default settings");
            Ok(RefinementSettings::default())
        }
    }
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let mut settings = match load_settings(opt.config_file.as_ref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if opt.n_visible_views.is_some() {
        settings.n_visible_views = opt.n_visible_views;
    }
    if opt.num_jobs.is_some() {
        settings.num_jobs = opt.num_jobs;
    }

    let config = RunConfig {
        input_folder: opt.input_folder,
        heatmap_folder: opt.heatmap_folder,
        patch_folder: opt.patch_folder,
        featuremap_folder: opt.featuremap_folder,
        vp_file: opt.vp_file,
        output_dir: opt.output_dir,
        output_folder: opt.output_folder,
        reuse: opt.reuse,
    };

    match RefinementRunner::new(config, settings).run() {
        Ok(outcome) => info!(
            "exported {} of {} lines",
            outcome.exported,
            outcome.bundle.tracks.len()
        ),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
