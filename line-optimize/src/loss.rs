#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Squared norms below this are treated as zero, where every loss is locally quadratic.
const QUADRATIC_LIMIT: f64 = 1e-12;

/// A robust loss `ρ(s)` applied to the squared norm `s` of a residual block.
///
/// All losses behave like `ρ(s) = s` near zero and grow sub-quadratically away from it,
/// bounding the influence that a single badly matched observation has on a track.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-serialize",
    serde(tag = "type", rename_all = "snake_case")
)]
pub enum RobustLoss {
    /// Plain least squares.
    Trivial,
    Huber { scale: f64 },
    Cauchy { scale: f64 },
    SoftL1 { scale: f64 },
    Arctan { scale: f64 },
}

impl Default for RobustLoss {
    fn default() -> Self {
        Self::Trivial
    }
}

impl RobustLoss {
    /// Evaluates `ρ(s)`.
    pub fn rho(self, s: f64) -> f64 {
        match self {
            Self::Trivial => s,
            Self::Huber { scale } => {
                if s <= scale * scale {
                    s
                } else {
                    2.0 * scale * s.sqrt() - scale * scale
                }
            }
            Self::Cauchy { scale } => {
                let c2 = scale * scale;
                c2 * (s / c2).ln_1p()
            }
            Self::SoftL1 { scale } => {
                let c2 = scale * scale;
                2.0 * c2 * ((1.0 + s / c2).sqrt() - 1.0)
            }
            Self::Arctan { scale } => scale * (s / scale).atan(),
        }
    }

    /// The factor `sqrt(ρ(s) / s)` which, applied to a block with squared norm `s`,
    /// turns its squared norm into `ρ(s)`.
    pub fn block_scale(self, s: f64) -> f64 {
        if s < QUADRATIC_LIMIT {
            1.0
        } else {
            (self.rho(s) / s).sqrt()
        }
    }
}

/// The weight and robust loss of a residual category.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WeightedLoss {
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_weight"))]
    pub weight: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub loss: RobustLoss,
}

#[cfg(feature = "serde-serialize")]
fn default_weight() -> f64 {
    1.0
}

impl WeightedLoss {
    pub fn new(weight: f64, loss: RobustLoss) -> Self {
        Self { weight, loss }
    }

    /// Scales the block by `sqrt(weight)` and then robustifies it in place.
    pub fn apply(&self, block: &mut [f64]) {
        let weight = self.weight.max(0.0).sqrt();
        block.iter_mut().for_each(|r| *r *= weight);
        let s: f64 = block.iter().map(|r| r * r).sum();
        let scale = self.loss.block_scale(s);
        block.iter_mut().for_each(|r| *r *= scale);
    }
}

impl Default for WeightedLoss {
    fn default() -> Self {
        Self::new(1.0, RobustLoss::Trivial)
    }
}
