//! Reading and writing line track bundles and cue data.
//!
//! A bundle folder contains:
//!
//! * `metadata.json` - `{ "n_visible_views": int, ... }`, other fields are passed through
//! * `images.json` - a list of `{ id, name, camera }`
//! * `segments.json` - a list of `{ image, segments: [[x1, y1, x2, y2], ...] }`
//! * `tracks.json` - a list of `{ id, line: [[x, y, z], [x, y, z]], observations: [[image, segment], ...] }`
//! * `stages.json` - optionally, the [`StageCache`] of the run that wrote the bundle

use crate::{
    ImageCollection, ImageInfo, LineTrack, RefinementError, Result, SegmentStore, StageCache,
    TrackStore,
};
use line_core::{ImageId, Line2d, Line3d, Observation, TrackId};
use line_optimize::{
    FeatureMap, FeatureMapStore, FeaturePatch, Heatmap, HeatmapStore, PatchStore, VpAssociation,
};
use log::{info, warn};
use ndarray::Array2;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

/// The name of the flattened output of the refined lines.
pub const LINES_FILE_NAME: &str = "lines_refined.txt";

const METADATA_FILE_NAME: &str = "metadata.json";
const IMAGES_FILE_NAME: &str = "images.json";
const SEGMENTS_FILE_NAME: &str = "segments.json";
const TRACKS_FILE_NAME: &str = "tracks.json";

/// The bundle metadata. Unknown fields are kept and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "default_n_visible_views")]
    pub n_visible_views: usize,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            n_visible_views: default_n_visible_views(),
            extra: serde_json::Map::new(),
        }
    }
}

fn default_n_visible_views() -> usize {
    4
}

#[derive(Serialize, Deserialize)]
struct SegmentRecord {
    image: ImageId,
    segments: Vec<Line2d>,
}

#[derive(Serialize, Deserialize)]
struct TrackRecord {
    id: TrackId,
    line: Line3d,
    observations: Vec<Observation>,
}

/// Everything a refinement run reads from and writes to a bundle folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    pub metadata: Metadata,
    pub images: ImageCollection,
    pub segments: SegmentStore,
    pub tracks: TrackStore,
}

impl Bundle {
    /// Loads and validates a bundle folder.
    pub fn load(folder: &Path) -> Result<Self> {
        if !folder.is_dir() {
            return Err(RefinementError::MissingInput(folder.to_owned()));
        }
        let metadata: Metadata = read_json(&folder.join(METADATA_FILE_NAME))?;
        let images: Vec<ImageInfo> = read_json(&folder.join(IMAGES_FILE_NAME))?;
        let segments: Vec<SegmentRecord> = read_json(&folder.join(SEGMENTS_FILE_NAME))?;
        let tracks: Vec<TrackRecord> = read_json(&folder.join(TRACKS_FILE_NAME))?;

        let images: ImageCollection = images.into_iter().collect();
        let segments: SegmentStore = segments
            .into_iter()
            .map(|record| (record.image, record.segments))
            .collect();
        let tracks = TrackStore::from_tracks(
            tracks
                .into_iter()
                .map(|record| LineTrack::new(record.id, record.line, record.observations))
                .collect::<Result<_, _>>()?,
        )?;
        tracks.validate(&images, &segments)?;
        info!(
            "loaded {} tracks, {} images and {} segments from {}",
            tracks.len(),
            images.len(),
            segments.total(),
            folder.display()
        );
        Ok(Self {
            metadata,
            images,
            segments,
            tracks,
        })
    }

    /// Writes the bundle into the folder, creating it if needed.
    pub fn save(&self, folder: &Path) -> Result<()> {
        fs::create_dir_all(folder).map_err(RefinementError::io(folder))?;
        write_json(&folder.join(METADATA_FILE_NAME), &self.metadata)?;
        write_json(
            &folder.join(IMAGES_FILE_NAME),
            &self.images.iter().collect::<Vec<_>>(),
        )?;
        let segments: Vec<SegmentRecord> = self
            .segments
            .iter()
            .map(|(image, segments)| SegmentRecord {
                image,
                segments: segments.to_vec(),
            })
            .collect();
        write_json(&folder.join(SEGMENTS_FILE_NAME), &segments)?;
        let tracks: Vec<TrackRecord> = self
            .tracks
            .iter()
            .map(|track| TrackRecord {
                id: track.id(),
                line: *track.line(),
                observations: track.observations().to_vec(),
            })
            .collect();
        write_json(&folder.join(TRACKS_FILE_NAME), &tracks)
    }

    /// Replaces the folder with this bundle and the stage cache.
    ///
    /// Anything previously in the folder is deleted.
    pub fn replace_folder(&self, folder: &Path, stages: &StageCache) -> Result<()> {
        if folder.exists() {
            fs::remove_dir_all(folder).map_err(RefinementError::io(folder))?;
        }
        self.save(folder)?;
        stages.save(folder)?;
        info!("saved bundle with {} tracks to {}", self.tracks.len(), folder.display());
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            RefinementError::MissingInput(path.to_owned())
        } else {
            RefinementError::Io {
                path: path.to_owned(),
                source,
            }
        }
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(RefinementError::json(path))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(RefinementError::io(path))?;
    serde_json::to_writer(BufWriter::new(file), value).map_err(RefinementError::json(path))
}

/// Writes the tracks as one line of six floats (both endpoints) each.
pub fn write_lines<'a>(
    path: &Path,
    tracks: impl IntoIterator<Item = &'a LineTrack>,
) -> Result<usize> {
    let file = File::create(path).map_err(RefinementError::io(path))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;
    for track in tracks {
        let [x1, y1, z1, x2, y2, z2] = track.line().as_array();
        writeln!(writer, "{} {} {} {} {} {}", x1, y1, z1, x2, y2, z2)
            .map_err(RefinementError::io(path))?;
        count += 1;
    }
    writer.flush().map_err(RefinementError::io(path))?;
    Ok(count)
}

/// Reads the file written by [`write_lines`].
pub fn read_lines(path: &Path) -> Result<Vec<Line3d>> {
    let text = fs::read_to_string(path).map_err(RefinementError::io(path))?;
    Ok(text
        .lines()
        .filter_map(|line| {
            let values: Vec<f64> = line
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .ok()?;
            match *values.as_slice() {
                [x1, y1, z1, x2, y2, z2] => Some(Line3d::from([[x1, y1, z1], [x2, y2, z2]])),
                _ => None,
            }
        })
        .collect())
}

fn require_folder(folder: &Path) -> Result<()> {
    if folder.is_dir() {
        Ok(())
    } else {
        Err(RefinementError::MissingInput(folder.to_owned()))
    }
}

/// The cue file of an image, or `None` (with a warning) if the image has none.
fn cue_file(folder: &Path, image: ImageId, extension: &str) -> Option<PathBuf> {
    let path = folder.join(format!("{}.{}", image, extension));
    if path.is_file() {
        Some(path)
    } else {
        warn!("no cue file {} for image {}", path.display(), image);
        None
    }
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(RefinementError::io(path))?;
    bincode::deserialize_from(BufReader::new(file)).map_err(RefinementError::bincode(path))
}

/// Loads `<image id>.png` grayscale heatmaps, normalized to `[0, 1]`.
pub fn load_heatmaps(folder: &Path, images: &ImageCollection) -> Result<HeatmapStore> {
    require_folder(folder)?;
    let mut store = HeatmapStore::new();
    for id in images.ids() {
        if let Some(path) = cue_file(folder, id, "png") {
            let luma = image::open(&path)
                .map_err(|source| RefinementError::Image {
                    path: path.clone(),
                    source,
                })?
                .to_luma32f();
            let (width, height) = luma.dimensions();
            let data = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                luma.get_pixel(x as u32, y as u32)[0]
            });
            store.insert(id, Heatmap(data));
        }
    }
    info!("loaded {} heatmaps from {}", store.len(), folder.display());
    Ok(store)
}

/// Loads `<image id>.bin` bincode [`FeatureMap`]s.
pub fn load_feature_maps(folder: &Path, images: &ImageCollection) -> Result<FeatureMapStore> {
    require_folder(folder)?;
    let mut maps = Vec::new();
    for image in images.ids() {
        if let Some(path) = cue_file(folder, image, "bin") {
            maps.push((image, read_bincode::<FeatureMap>(&path)?));
        }
    }
    let channels = maps.first().map_or(0, |(_, map)| map.channels());
    let mut store = FeatureMapStore::new(channels);
    for (image, map) in maps {
        store.insert(image, map)?;
    }
    info!("loaded {} feature maps from {}", store.len(), folder.display());
    Ok(store)
}

/// Loads `<image id>.bin` bincode lists of [`FeaturePatch`]es.
pub fn load_patches(folder: &Path, images: &ImageCollection) -> Result<PatchStore> {
    require_folder(folder)?;
    let mut patches = Vec::new();
    for image in images.ids() {
        if let Some(path) = cue_file(folder, image, "bin") {
            patches.push((image, read_bincode::<Vec<FeaturePatch>>(&path)?));
        }
    }
    let channels = patches
        .iter()
        .flat_map(|(_, patches)| patches.first())
        .map(|patch| patch.map.channels())
        .next()
        .unwrap_or(0);
    let mut store = PatchStore::new(channels);
    for (image, image_patches) in patches {
        store.insert(image, image_patches)?;
    }
    info!("loaded patches of {} images from {}", store.len(), folder.display());
    Ok(store)
}

/// Loads a JSON [`VpAssociation`].
pub fn load_vp_association(path: &Path) -> Result<VpAssociation> {
    let association: VpAssociation = read_json(path)?;
    info!(
        "loaded vanishing points of {} images from {}",
        association.len(),
        path.display()
    );
    Ok(association)
}

/// Writes a bincode file, which is how feature maps and patches are stored.
pub fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(RefinementError::io(path))?;
    bincode::serialize_into(BufWriter::new(file), value).map_err(RefinementError::bincode(path))
}
