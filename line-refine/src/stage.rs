use crate::{RefinementError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, io::BufWriter, path::Path};

/// A step of a refinement run whose result can be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    #[serde(rename = "vp")]
    VanishingPoints,
    Refine,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Input,
        Stage::VanishingPoints,
        Stage::Refine,
        Stage::Export,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    NotStarted,
    /// The stage ran during this run.
    Computed,
    /// The stage result was taken from a previous run with the same key.
    Loaded,
}

/// The state of a stage and the key of the parameters it ran with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub state: StageState,
    #[serde(default)]
    pub key: Option<String>,
}

impl Default for StageRecord {
    fn default() -> Self {
        Self {
            state: StageState::NotStarted,
            key: None,
        }
    }
}

/// The record of which stages ran and with which parameters, stored as `stages.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageCache {
    stages: BTreeMap<Stage, StageRecord>,
}

impl StageCache {
    pub const FILE_NAME: &'static str = "stages.json";

    pub fn new() -> Self {
        Self {
            stages: Stage::ALL
                .iter()
                .map(|&stage| (stage, StageRecord::default()))
                .collect(),
        }
    }

    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.record(stage)
            .map_or(StageState::NotStarted, |record| record.state)
    }

    pub fn key(&self, stage: Stage) -> Option<&str> {
        self.record(stage)?.key.as_deref()
    }

    /// Checks if the stage completed with the given key.
    pub fn matches(&self, stage: Stage, key: &str) -> bool {
        self.state(stage) != StageState::NotStarted && self.key(stage) == Some(key)
    }

    pub fn mark_computed(&mut self, stage: Stage, key: impl Into<String>) {
        self.mark(stage, StageState::Computed, key.into());
    }

    pub fn mark_loaded(&mut self, stage: Stage, key: impl Into<String>) {
        self.mark(stage, StageState::Loaded, key.into());
    }

    fn mark(&mut self, stage: Stage, state: StageState, key: String) {
        info!("stage {:?} is {:?}", stage, state);
        self.stages.insert(
            stage,
            StageRecord {
                state,
                key: Some(key),
            },
        );
    }

    /// Loads the cache from the bundle folder, if it has one.
    pub fn load(folder: &Path) -> Result<Option<Self>> {
        let path = folder.join(Self::FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(RefinementError::io(&path))?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(RefinementError::json(path))
    }

    pub fn save(&self, folder: &Path) -> Result<()> {
        let path = folder.join(Self::FILE_NAME);
        let file = File::create(&path).map_err(RefinementError::io(&path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(RefinementError::json(path))
    }
}

/// Builds a cache key from the effective parameters of a stage.
///
/// The key is the parameters' JSON text, so it is stable across runs and builds.
pub fn stage_key<T: Serialize>(parameters: &T) -> Result<String> {
    serde_json::to_string(parameters).map_err(RefinementError::StageKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_only_completed_stages() {
        let mut cache = StageCache::new();
        assert_eq!(cache.state(Stage::Refine), StageState::NotStarted);
        assert!(!cache.matches(Stage::Refine, "a"));
        cache.mark_computed(Stage::Refine, "a");
        assert!(cache.matches(Stage::Refine, "a"));
        assert!(!cache.matches(Stage::Refine, "b"));
        cache.mark_loaded(Stage::Refine, "b");
        assert_eq!(cache.state(Stage::Refine), StageState::Loaded);
        assert!(cache.matches(Stage::Refine, "b"));
    }

    #[test]
    fn round_trip_through_folder() {
        let folder = tempfile::tempdir().unwrap();
        assert_eq!(StageCache::load(folder.path()).unwrap(), None);
        let mut cache = StageCache::new();
        cache.mark_computed(Stage::Input, stage_key(&("input", 3)).unwrap());
        cache.save(folder.path()).unwrap();
        assert_eq!(StageCache::load(folder.path()).unwrap(), Some(cache));
    }

    #[test]
    fn unserializable_parameters_have_no_key() {
        assert_eq!(stage_key(&("vp", 2)).unwrap(), r#"["vp",2]"#);
        let parameters: BTreeMap<_, _> = [(vec![1u8], 2u8)].into_iter().collect();
        assert!(matches!(
            stage_key(&parameters),
            Err(RefinementError::StageKey(_))
        ));
    }
}
