use line_optimize::{CostSettings, OptimizerSettings};
use serde::{Deserialize, Serialize};

/// The settings for refining a bundle of line tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementSettings {
    /// Add heatmap residuals, which requires a heatmap folder.
    #[serde(default = "default_use_heatmap")]
    pub use_heatmap: bool,
    /// Add feature consistency residuals, which requires a patch or feature map folder.
    #[serde(default = "default_use_feature")]
    pub use_feature: bool,
    /// Add vanishing point residuals, which requires a vanishing point file.
    #[serde(default = "default_use_vp")]
    pub use_vp: bool,
    /// The minimum number of distinct images a track needs to be exported.
    ///
    /// If this is not set, the value recorded in the bundle metadata is used.
    #[serde(default)]
    pub n_visible_views: Option<usize>,
    /// The number of worker threads, which defaults to one per core.
    #[serde(default)]
    pub num_jobs: Option<usize>,
    /// Residual weights, robust losses and sample counts.
    #[serde(default)]
    pub cost: CostSettings,
    /// Levenberg-Marquardt settings of each track.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            use_heatmap: default_use_heatmap(),
            use_feature: default_use_feature(),
            use_vp: default_use_vp(),
            n_visible_views: None,
            num_jobs: None,
            cost: CostSettings::default(),
            optimizer: OptimizerSettings::default(),
        }
    }
}

fn default_use_heatmap() -> bool {
    false
}

fn default_use_feature() -> bool {
    false
}

fn default_use_vp() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use line_optimize::RobustLoss;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: RefinementSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, RefinementSettings::default());
    }

    #[test]
    fn partial_cost_settings() {
        let settings: RefinementSettings = serde_json::from_str(
            r#"{
                "use_heatmap": true,
                "num_jobs": 3,
                "cost": { "heatmap": { "weight": 4.0, "loss": { "type": "huber", "scale": 0.5 } } },
                "optimizer": { "min_images": 3 }
            }"#,
        )
        .unwrap();
        assert!(settings.use_heatmap);
        assert_eq!(settings.num_jobs, Some(3));
        assert_eq!(settings.cost.heatmap.weight, 4.0);
        assert_eq!(settings.cost.heatmap.loss, RobustLoss::Huber { scale: 0.5 });
        assert_eq!(settings.cost.reprojection, CostSettings::default().reprojection);
        assert_eq!(settings.optimizer.min_images, 3);
        assert_eq!(settings.optimizer.patience, OptimizerSettings::default().patience);
    }
}
