//! # Line Core
//!
//! This library provides the geometric vocabulary shared by the line refinement crates:
//! pinhole cameras with known poses, 2d line segments detected on images, and 3d lines in
//! both segment and [Plücker](https://en.wikipedia.org/wiki/Pl%C3%BCcker_coordinates) form.
//! It also provides [`LineChart`], the minimal parameterization that optimizers use to move
//! a 3d line around without ever leaving the space of valid lines.
//!
//! ## Projecting lines
//!
//! A 3d line with unit direction `d` and moment `m = p × d` (for any point `p` on the line) is
//! transformed into the camera frame of a [`Camera`] with pose `(R, t)` as:
//!
//! ```text
//! d_c = R d
//! m_c = R m + t × d_c
//! ```
//!
//! The moment `m_c` is the normal of the plane passing through the optical center and the line,
//! which is exactly the homogeneous image line in normalized image coordinates. Multiplying by
//! the inverse transpose of the intrinsic matrix gives the line in pixel coordinates:
//!
//! ```text
//!                line
//!   ------------------------------
//!          \              /
//!           \   plane    /
//!            \          /
//!   @@@@@@@@@@\@@@@@@@@/@@@@@@@@  <- image line = K^-T m_c
//!              \      /
//!               \    /
//!                \  /
//!                 O
//! ```
//!
//! Every residual that compares a 3d line against a detection is built from this projection.

mod camera;
mod line2d;
mod line3d;
mod parameterization;
mod pose;

pub use camera::*;
pub use line2d::*;
pub use line3d::*;
pub use nalgebra;
pub use parameterization::*;
pub use pose::*;

use derive_more::{Display, From, Into};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Identifies an image (and therefore a camera) in an image collection.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(transparent))]
pub struct ImageId(pub usize);

/// Identifies a line track.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(transparent))]
pub struct TrackId(pub usize);

/// A reference to the `segment`th 2d line segment detected on `image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-serialize",
    serde(from = "(ImageId, usize)", into = "(ImageId, usize)")
)]
pub struct Observation {
    pub image: ImageId,
    pub segment: usize,
}

impl Observation {
    pub fn new(image: ImageId, segment: usize) -> Self {
        Self { image, segment }
    }
}

impl From<(ImageId, usize)> for Observation {
    fn from((image, segment): (ImageId, usize)) -> Self {
        Self::new(image, segment)
    }
}

impl From<Observation> for (ImageId, usize) {
    fn from(observation: Observation) -> Self {
        (observation.image, observation.segment)
    }
}
