use line_core::{Camera, ImageId, Line2d, Observation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A calibrated image: its camera and the name of the image file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: ImageId,
    pub name: String,
    pub camera: Camera,
}

/// Every image of a bundle, keyed by image id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCollection {
    images: BTreeMap<ImageId, ImageInfo>,
}

impl ImageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an image, replacing and returning a previous image with the same id.
    pub fn insert(&mut self, image: ImageInfo) -> Option<ImageInfo> {
        self.images.insert(image.id, image)
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageInfo> {
        self.images.get(&id)
    }

    pub fn camera(&self, id: ImageId) -> Option<&Camera> {
        self.get(id).map(|image| &image.camera)
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.images.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.images.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageInfo> + '_ {
        self.images.values()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FromIterator<ImageInfo> for ImageCollection {
    fn from_iter<T: IntoIterator<Item = ImageInfo>>(iter: T) -> Self {
        Self {
            images: iter.into_iter().map(|image| (image.id, image)).collect(),
        }
    }
}

/// The 2d line segments detected on each image, indexed by segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentStore {
    segments: BTreeMap<ImageId, Vec<Line2d>>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: ImageId, segments: Vec<Line2d>) -> Option<Vec<Line2d>> {
        self.segments.insert(image, segments)
    }

    /// The segments of the image, which is empty if none were detected.
    pub fn get(&self, image: ImageId) -> &[Line2d] {
        self.segments
            .get(&image)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Looks up the segment an observation refers to.
    pub fn segment(&self, observation: Observation) -> Option<Line2d> {
        self.get(observation.image).get(observation.segment).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ImageId, &[Line2d])> + '_ {
        self.segments
            .iter()
            .map(|(&image, segments)| (image, segments.as_slice()))
    }

    /// The total number of segments over all images.
    pub fn total(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }
}

impl FromIterator<(ImageId, Vec<Line2d>)> for SegmentStore {
    fn from_iter<T: IntoIterator<Item = (ImageId, Vec<Line2d>)>>(iter: T) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}
