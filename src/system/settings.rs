//! Process-wide settings, loaded from YAML.
//!
//! Every field has a default, so a settings file only needs to list what it
//! overrides:
//!
//! ```yaml
//! failure_mode: relocalise
//! relocaliser_type: forest
//! slam_component:
//!   relocaliser_training_skip: 5
//! ```

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::relocalisation::ForestRelocaliserConfig;

/// What to do with the tracker's verdict when tracking degrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Run the relocaliser (training, update and recovery).
    #[default]
    Relocalise,
    /// Treat failed tracking as poor and keep going.
    StopIntegration,
    /// Treat every frame as well tracked.
    Ignore,
}

/// Volumetric scene parameters, passed through to the fusion engine and
/// recorded alongside saved models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneParams {
    /// Truncation band of the signed distance function (metres).
    pub mu: f32,
    pub view_frustum_min: f32,
    pub view_frustum_max: f32,
    pub voxel_size: f32,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            mu: 0.02,
            view_frustum_min: 0.2,
            view_frustum_max: 3.0,
            voxel_size: 0.005,
        }
    }
}

/// Settings specific to the per-scene tracking/relocalisation loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamComponentSettings {
    /// Tell the relocaliser once the input is exhausted.
    pub finish_training_enabled: bool,
    /// Relocalise and train on every frame without keeping the relocalised
    /// pose. Used to evaluate relocalisers against a known trajectory.
    pub relocalise_every_frame: bool,
    /// Train on every N-th well-tracked frame; 0 trains on all of them.
    pub relocaliser_training_skip: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamSettings {
    pub failure_mode: FailureMode,
    /// Poorly tracked frames are still fused until this many frames have been fused.
    pub initial_frames_to_fuse: usize,
    /// `"forest"` or `"none"`.
    pub relocaliser_type: String,
    /// Set when the input comes with a global pose for every sub-sequence.
    pub global_poses_specifier: Option<String>,
    pub scene_params: SceneParams,
    pub slam_component: SlamComponentSettings,
    pub relocaliser: ForestRelocaliserConfig,
}

impl Default for SlamSettings {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::default(),
            initial_frames_to_fuse: 50,
            relocaliser_type: "forest".to_string(),
            global_poses_specifier: None,
            scene_params: SceneParams::default(),
            slam_component: SlamComponentSettings::default(),
            relocaliser: ForestRelocaliserConfig::default(),
        }
    }
}

impl SlamSettings {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse SLAM settings")
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        serde_yaml::from_reader(file).with_context(|| format!("Failed to parse SLAM settings in {:?}", path))
    }

    pub fn uses_global_poses(&self) -> bool {
        self.global_poses_specifier
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SlamSettings::default();
        assert_eq!(settings.failure_mode, FailureMode::Relocalise);
        assert_eq!(settings.initial_frames_to_fuse, 50);
        assert_eq!(settings.slam_component.relocaliser_training_skip, 0);
        assert!(!settings.uses_global_poses());
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let settings = SlamSettings::from_yaml_str(
            r#"
failure_mode: stop_integration
global_poses_specifier: poses.txt
scene_params:
  voxel_size: 0.01
slam_component:
  relocaliser_training_skip: 5
relocaliser:
  max_hypotheses: 8
"#,
        )
        .unwrap();

        assert_eq!(settings.failure_mode, FailureMode::StopIntegration);
        assert_eq!(settings.scene_params.voxel_size, 0.01);
        assert_eq!(settings.scene_params.mu, 0.02);
        assert_eq!(settings.slam_component.relocaliser_training_skip, 5);
        assert_eq!(settings.relocaliser.max_hypotheses, 8);
        assert_eq!(settings.initial_frames_to_fuse, 50);
        assert!(settings.uses_global_poses());
    }

    #[test]
    fn test_unknown_failure_mode_rejected() {
        assert!(SlamSettings::from_yaml_str("failure_mode: panic").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "failure_mode: ignore\n").unwrap();

        let settings = SlamSettings::from_yaml_file(&path).unwrap();
        assert_eq!(settings.failure_mode, FailureMode::Ignore);
        assert!(SlamSettings::from_yaml_file(&dir.path().join("missing.yaml")).is_err());
    }
}
