use line_core::{ImageId, TrackId};
use line_optimize::CueError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = RefinementError> = std::result::Result<T, E>;

/// Violations of the line track invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("track {0} has no observations")]
    NoObservations(TrackId),
    #[error("track id {0} is used by more than one track")]
    DuplicateTrack(TrackId),
    #[error("track {track} observes image {image}, which is not in the image collection")]
    UnknownImage { track: TrackId, image: ImageId },
    #[error("track {track} observes segment {segment} of image {image}, which only has {available} segments")]
    UnknownSegment {
        track: TrackId,
        image: ImageId,
        segment: usize,
        available: usize,
    },
    #[error("segments were given for image {0}, which is not in the image collection")]
    UnknownSegmentImage(ImageId),
}

#[derive(Debug, Error)]
pub enum RefinementError {
    #[error("{cue} refinement is enabled, but no {cue} source was given (pass it with {flag})")]
    MissingCueSource {
        cue: &'static str,
        flag: &'static str,
    },
    #[error("{cue} source {path} does not exist (given with {flag})")]
    MissingCueFolder {
        cue: &'static str,
        flag: &'static str,
        path: PathBuf,
    },
    #[error("required input {0} does not exist")]
    MissingInput(PathBuf),
    #[error("unable to serialize stage parameters: {0}")]
    StageKey(#[source] serde_json::Error),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid binary data in {path}: {source}")]
    Bincode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("unable to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid track: {0}")]
    InvalidTrack(#[from] TrackError),
    #[error("invalid cue data: {0}")]
    Cue(#[from] CueError),
    #[cfg(feature = "rayon")]
    #[error("unable to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl RefinementError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>) -> impl FnOnce(serde_json::Error) -> Self {
        let path = path.into();
        move |source| Self::Json { path, source }
    }

    pub(crate) fn bincode(path: impl Into<PathBuf>) -> impl FnOnce(bincode::Error) -> Self {
        let path = path.into();
        move |source| Self::Bincode { path, source }
    }
}
