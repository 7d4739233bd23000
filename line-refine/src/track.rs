use crate::{ImageCollection, SegmentStore, TrackError};
use itertools::Itertools;
use line_core::{ImageId, Line3d, Observation, TrackId};
use std::collections::HashSet;

/// A 3d line hypothesis and the 2d detections supporting it.
#[derive(Debug, Clone, PartialEq)]
pub struct LineTrack {
    id: TrackId,
    line: Line3d,
    observations: Vec<Observation>,
}

impl LineTrack {
    /// Creates a track, which needs at least one observation.
    pub fn new(id: TrackId, line: Line3d, observations: Vec<Observation>) -> Result<Self, TrackError> {
        if observations.is_empty() {
            return Err(TrackError::NoObservations(id));
        }
        Ok(Self {
            id,
            line,
            observations,
        })
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn line(&self) -> &Line3d {
        &self.line
    }

    pub fn set_line(&mut self, line: Line3d) {
        self.line = line;
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// The distinct images the track is observed on, in observation order.
    pub fn images(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.observations
            .iter()
            .map(|observation| observation.image)
            .unique()
    }

    /// The number of distinct images the track is observed on.
    pub fn visibility(&self) -> usize {
        self.images().count()
    }

    /// Checks that every observation refers to a known image and segment.
    pub fn validate(&self, images: &ImageCollection, segments: &SegmentStore) -> Result<(), TrackError> {
        for observation in &self.observations {
            if !images.contains(observation.image) {
                return Err(TrackError::UnknownImage {
                    track: self.id,
                    image: observation.image,
                });
            }
            let available = segments.get(observation.image).len();
            if observation.segment >= available {
                return Err(TrackError::UnknownSegment {
                    track: self.id,
                    image: observation.image,
                    segment: observation.segment,
                    available,
                });
            }
        }
        Ok(())
    }
}

/// The line tracks of a bundle, in a fixed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackStore {
    tracks: Vec<LineTrack>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from tracks with unique ids.
    pub fn from_tracks(tracks: Vec<LineTrack>) -> Result<Self, TrackError> {
        let mut seen = HashSet::with_capacity(tracks.len());
        for track in &tracks {
            if !seen.insert(track.id) {
                return Err(TrackError::DuplicateTrack(track.id));
            }
        }
        Ok(Self { tracks })
    }

    pub fn push(&mut self, track: LineTrack) -> Result<(), TrackError> {
        if self.get(track.id).is_some() {
            return Err(TrackError::DuplicateTrack(track.id));
        }
        self.tracks.push(track);
        Ok(())
    }

    pub fn get(&self, id: TrackId) -> Option<&LineTrack> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn tracks(&self) -> &[LineTrack] {
        &self.tracks
    }

    pub fn iter(&self) -> impl Iterator<Item = &LineTrack> + '_ {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Checks every track against the images and segments of its bundle.
    pub fn validate(&self, images: &ImageCollection, segments: &SegmentStore) -> Result<(), TrackError> {
        if let Some((image, _)) = segments.iter().find(|&(image, _)| !images.contains(image)) {
            return Err(TrackError::UnknownSegmentImage(image));
        }
        self.tracks
            .iter()
            .try_for_each(|track| track.validate(images, segments))
    }

    /// The tracks visible on at least `min_visibility` distinct images, in the same order.
    pub fn filter_by_visibility(&self, min_visibility: usize) -> Self {
        Self {
            tracks: self
                .tracks
                .iter()
                .filter(|track| track.visibility() >= min_visibility)
                .cloned()
                .collect(),
        }
    }
}

impl IntoIterator for TrackStore {
    type Item = LineTrack;
    type IntoIter = std::vec::IntoIter<LineTrack>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.into_iter()
    }
}
