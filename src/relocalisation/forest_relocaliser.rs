//! Relocaliser backed by a regression forest.
//!
//! Pipeline for one frame:
//! 1. External feature calculator: camera-space keypoints + descriptors
//! 2. Forest kernel: per-pixel world-space mode lists
//! 3. Sample 3-point correspondences and solve for rigid camera poses
//! 4. Consensus vote over the hypotheses and blend the winner's inliers

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use image::RgbaImage;
use nalgebra::Vector3;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{RelocalisationQuality, RelocalisationResult, Relocaliser};
use crate::forest::{DescriptorImage, ForestModel, predict_image};
use crate::geometry::{SE3, blend_poses, estimate_rigid_transform, find_best_hypothesis_in};
use crate::tracking::frame::{DepthImage, Intrinsics};

/// Camera-space 3D point for one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint3D {
    pub position: Vector3<f32>,
    pub valid: bool,
}

impl Keypoint3D {
    pub fn invalid() -> Self {
        Self {
            position: Vector3::zeros(),
            valid: false,
        }
    }
}

/// Per-pixel keypoints and descriptors, both in row-major pixel order.
#[derive(Debug, Clone)]
pub struct FeatureImages {
    pub keypoints: Vec<Keypoint3D>,
    pub descriptors: DescriptorImage,
}

/// Computes RGB-D patch features for a frame.
pub trait FeatureCalculator: Send {
    fn compute(&self, rgb: &RgbaImage, depth: &DepthImage, intrinsics: &Intrinsics) -> Result<FeatureImages>;
}

/// Configuration for hypothesis generation and voting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestRelocaliserConfig {
    /// Number of pose hypotheses to generate per frame.
    pub max_hypotheses: usize,
    /// Upper bound on 3-point samples drawn per frame.
    pub max_sample_attempts: usize,
    /// Rotation threshold for pose similarity (radians).
    pub rotation_threshold: f64,
    /// Translation threshold for pose similarity (metres).
    pub translation_threshold: f64,
    /// Allowed disagreement between camera-space and world-space pairwise
    /// distances of a sample (metres).
    pub distance_tolerance: f64,
    /// Samples spanning a smaller triangle are treated as collinear (m²).
    pub min_triangle_area: f64,
    /// Inlier count at which a candidate is labelled good.
    pub min_good_inliers: usize,
    pub seed: u64,
}

impl Default for ForestRelocaliserConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 64,
            max_sample_attempts: 2000,
            rotation_threshold: 10f64.to_radians(),
            translation_threshold: 0.05,
            distance_tolerance: 0.05,
            min_triangle_area: 1e-3,
            min_good_inliers: 16,
            seed: 42,
        }
    }
}

/// Pixel with a valid keypoint and its best predicted world position.
struct Correspondence {
    camera: Vector3<f64>,
    world: Vector3<f64>,
}

pub struct ForestRelocaliser {
    model: ForestModel,
    features: Box<dyn FeatureCalculator>,
    config: ForestRelocaliserConfig,
    frames_trained: usize,
    frames_updated: usize,
    training_finished: bool,
}

impl ForestRelocaliser {
    pub fn new(model: ForestModel, features: Box<dyn FeatureCalculator>, config: ForestRelocaliserConfig) -> Self {
        Self {
            model,
            features,
            config,
            frames_trained: 0,
            frames_updated: 0,
            training_finished: false,
        }
    }

    pub fn model(&self) -> &ForestModel {
        &self.model
    }

    pub fn config(&self) -> &ForestRelocaliserConfig {
        &self.config
    }

    pub fn frames_trained(&self) -> usize {
        self.frames_trained
    }

    pub fn frames_updated(&self) -> usize {
        self.frames_updated
    }

    pub fn training_finished(&self) -> bool {
        self.training_finished
    }

    /// Location of the serialized model below a save directory.
    pub fn model_path(dir: &Path) -> PathBuf {
        dir.join("relocaliser").join("forest.json")
    }

    fn correspondences(&self, features: &FeatureImages) -> Result<Vec<Correspondence>> {
        if features.keypoints.len() != features.descriptors.num_pixels() {
            bail!(
                "Feature calculator returned {} keypoints for {} descriptors",
                features.keypoints.len(),
                features.descriptors.num_pixels()
            );
        }

        let predictions = predict_image(&self.model, &features.descriptors);
        Ok(features
            .keypoints
            .iter()
            .zip(predictions.iter())
            .filter(|(keypoint, _)| keypoint.valid)
            .filter_map(|(keypoint, prediction)| {
                prediction.best().map(|mode| Correspondence {
                    camera: keypoint.position.cast::<f64>(),
                    world: mode.position.cast::<f64>(),
                })
            })
            .collect())
    }

    /// Rigid camera-to-world hypotheses from random 3-point samples.
    fn generate_hypotheses(&self, points: &[Correspondence]) -> Vec<SE3> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut hypotheses = Vec::with_capacity(self.config.max_hypotheses);

        for _ in 0..self.config.max_sample_attempts {
            if hypotheses.len() >= self.config.max_hypotheses {
                break;
            }

            let sample = sample_three_indices(&mut rng, points.len()).map(|i| &points[i]);
            if !self.sample_is_consistent(&sample) {
                continue;
            }

            let camera: Vec<Vector3<f64>> = sample.iter().map(|c| c.camera).collect();
            let world: Vec<Vector3<f64>> = sample.iter().map(|c| c.world).collect();
            if let Some(pose) = estimate_rigid_transform(&camera, &world) {
                hypotheses.push(pose);
            }
        }

        hypotheses
    }

    /// Reject near-collinear samples and samples that cannot be related by a
    /// rigid transform.
    fn sample_is_consistent(&self, sample: &[&Correspondence; 3]) -> bool {
        let [a, b, c] = sample;
        let area = 0.5 * (b.camera - a.camera).cross(&(c.camera - a.camera)).norm();
        if area < self.config.min_triangle_area {
            return false;
        }

        [(a, b), (a, c), (b, c)].iter().all(|(p, q)| {
            let camera_dist = (p.camera - q.camera).norm();
            let world_dist = (p.world - q.world).norm();
            (camera_dist - world_dist).abs() <= self.config.distance_tolerance
        })
    }
}

impl Relocaliser for ForestRelocaliser {
    fn relocalise(
        &mut self,
        rgb: &RgbaImage,
        depth: &DepthImage,
        intrinsics: &Intrinsics,
    ) -> Result<Vec<RelocalisationResult>> {
        let features = self.features.compute(rgb, depth, intrinsics)?;
        let points = self.correspondences(&features)?;
        if points.len() < 3 {
            debug!(points = points.len(), "Too few correspondences to relocalise");
            return Ok(Vec::new());
        }

        let hypotheses = self.generate_hypotheses(&points);
        let Some(best) = find_best_hypothesis_in(
            &hypotheses,
            self.config.rotation_threshold,
            self.config.translation_threshold,
        ) else {
            debug!(points = points.len(), "No consistent pose hypotheses");
            return Ok(Vec::new());
        };

        let pose = blend_poses(&best.inliers).unwrap_or(best.pose);
        let inliers = best.inliers.len();
        let quality = if inliers >= self.config.min_good_inliers {
            RelocalisationQuality::Good
        } else {
            RelocalisationQuality::Poor
        };

        debug!(
            points = points.len(),
            hypotheses = hypotheses.len(),
            inliers,
            ?quality,
            "Relocalised frame"
        );

        Ok(vec![RelocalisationResult {
            pose,
            quality,
            score: inliers as f64 / hypotheses.len() as f64,
        }])
    }

    fn train(
        &mut self,
        _rgb: &RgbaImage,
        _depth: &DepthImage,
        _intrinsics: &Intrinsics,
        _camera_pose: &SE3,
    ) -> Result<()> {
        if !self.training_finished {
            self.frames_trained += 1;
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        if !self.training_finished {
            self.frames_updated += 1;
        }
        Ok(())
    }

    fn finish_training(&mut self) {
        info!(frames = self.frames_trained, "Relocaliser training finished");
        self.training_finished = true;
    }

    fn reset(&mut self) {
        self.frames_trained = 0;
        self.frames_updated = 0;
        self.training_finished = false;
    }

    fn save_to_disk(&self, dir: &Path) -> Result<()> {
        self.model.save(&Self::model_path(dir))
    }

    fn load_from_disk(&mut self, dir: &Path) -> Result<()> {
        self.model = ForestModel::load(&Self::model_path(dir))?;
        info!(trees = self.model.forest().num_trees(), "Loaded relocaliser forest");
        Ok(())
    }
}

/// Sample three unique random indices.
fn sample_three_indices(rng: &mut impl Rng, n: usize) -> [usize; 3] {
    let first = rng.gen_range(0..n);
    let mut second = rng.gen_range(0..n);
    while second == first {
        second = rng.gen_range(0..n);
    }
    let mut third = rng.gen_range(0..n);
    while third == first || third == second {
        third = rng.gen_range(0..n);
    }
    [first, second, third]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::model::tests::mode_at;
    use crate::forest::{Forest, LeafPrediction, Node};
    use approx::assert_relative_eq;

    /// Returns fixed features regardless of the input images.
    struct FixedFeatures(FeatureImages);

    impl FeatureCalculator for FixedFeatures {
        fn compute(&self, _: &RgbaImage, _: &DepthImage, _: &Intrinsics) -> Result<FeatureImages> {
            Ok(self.0.clone())
        }
    }

    /// One chain-shaped tree sending a descriptor value `k` to leaf `k`.
    fn chain_forest(leaves: u32) -> Forest {
        let mut nodes = Vec::new();
        for k in 0..leaves - 1 {
            let left_child = 2 * k + 1;
            nodes.push(Node::Split {
                feature: 0,
                threshold: k as f32 + 0.5,
                left_child,
            });
            nodes.push(Node::Leaf { leaf: k });
        }
        nodes.push(Node::Leaf { leaf: leaves - 1 });
        Forest::new(vec![nodes]).unwrap()
    }

    fn camera_points() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.5, 0.0, 1.2),
            Vector3::new(0.0, 0.5, 1.5),
            Vector3::new(-0.4, 0.3, 2.0),
            Vector3::new(0.3, -0.4, 1.8),
            Vector3::new(0.6, 0.6, 2.5),
            Vector3::new(-0.5, -0.5, 1.1),
            Vector3::new(0.2, 0.1, 3.0),
        ]
    }

    fn true_pose() -> SE3 {
        SE3::from_axis_angle(Vector3::new(0.0, 0.0, 0.3), Vector3::new(0.5, -0.2, 1.0))
    }

    /// A relocaliser whose forest maps pixel `k` to the world position of
    /// camera point `k` under `true_pose`, plus one outlier pixel.
    fn scene(config: ForestRelocaliserConfig) -> ForestRelocaliser {
        let pose = true_pose();
        let mut world: Vec<Vector3<f64>> = camera_points().iter().map(|p| pose.transform_point(p)).collect();
        world.push(Vector3::new(10.0, -7.0, 4.0));
        let mut cameras = camera_points();
        cameras.push(Vector3::new(0.1, 0.2, 1.3));

        let n = world.len();
        let leaves = world
            .iter()
            .map(|w| LeafPrediction::new(vec![mode_at(w.x as f32, w.y as f32, w.z as f32, 10)]))
            .collect();
        let model = ForestModel::new(chain_forest(n as u32), vec![leaves]).unwrap();

        let mut descriptors = DescriptorImage::new(n, 1, 1);
        for k in 0..n {
            descriptors.descriptor_mut(k)[0] = k as f32;
        }
        let keypoints = cameras
            .iter()
            .map(|p| Keypoint3D {
                position: p.cast::<f32>(),
                valid: true,
            })
            .collect();

        ForestRelocaliser::new(
            model,
            Box::new(FixedFeatures(FeatureImages { keypoints, descriptors })),
            config,
        )
    }

    fn inputs() -> (RgbaImage, DepthImage, Intrinsics) {
        (
            RgbaImage::new(9, 1),
            DepthImage::new(9, 1),
            Intrinsics::new(1.0, 1.0, 0.0, 0.0),
        )
    }

    #[test]
    fn test_relocalise_recovers_pose() {
        let config = ForestRelocaliserConfig {
            max_hypotheses: 16,
            min_good_inliers: 4,
            ..Default::default()
        };
        let mut reloc = scene(config);
        let (rgb, depth, k) = inputs();

        let results = reloc.relocalise(&rgb, &depth, &k).unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.quality, RelocalisationQuality::Good);

        let expected = true_pose();
        assert_relative_eq!(result.pose.translation, expected.translation, epsilon = 1e-4);
        assert!(result.pose.rotation_angle_to(&expected) < 1e-4);
        assert!(result.score > 0.0 && result.score <= 1.0);
    }

    #[test]
    fn test_relocalise_poor_when_support_is_low() {
        let config = ForestRelocaliserConfig {
            max_hypotheses: 4,
            min_good_inliers: 100,
            ..Default::default()
        };
        let mut reloc = scene(config);
        let (rgb, depth, k) = inputs();

        let results = reloc.relocalise(&rgb, &depth, &k).unwrap();
        assert_eq!(results[0].quality, RelocalisationQuality::Poor);
    }

    #[test]
    fn test_too_few_valid_keypoints() {
        let mut reloc = scene(ForestRelocaliserConfig::default());
        let (rgb, depth, k) = inputs();
        let mut features = reloc.features.compute(&rgb, &depth, &k).unwrap();
        for keypoint in features.keypoints.iter_mut().skip(2) {
            *keypoint = Keypoint3D::invalid();
        }
        reloc.features = Box::new(FixedFeatures(features));

        assert!(reloc.relocalise(&rgb, &depth, &k).unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_feature_sizes_rejected() {
        let mut reloc = scene(ForestRelocaliserConfig::default());
        reloc.features = Box::new(FixedFeatures(FeatureImages {
            keypoints: vec![Keypoint3D::invalid(); 2],
            descriptors: DescriptorImage::new(3, 1, 1),
        }));
        let (rgb, depth, k) = inputs();

        assert!(reloc.relocalise(&rgb, &depth, &k).is_err());
    }

    #[test]
    fn test_training_counters_and_finish() {
        let mut reloc = scene(ForestRelocaliserConfig::default());
        let (rgb, depth, k) = inputs();

        reloc.train(&rgb, &depth, &k, &SE3::identity()).unwrap();
        reloc.update().unwrap();
        reloc.update().unwrap();
        assert_eq!(reloc.frames_trained(), 1);
        assert_eq!(reloc.frames_updated(), 2);

        reloc.finish_training();
        reloc.train(&rgb, &depth, &k, &SE3::identity()).unwrap();
        assert_eq!(reloc.frames_trained(), 1);
        assert!(reloc.training_finished());

        reloc.reset();
        assert_eq!(reloc.frames_trained(), 0);
        assert!(!reloc.training_finished());
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let reloc = scene(ForestRelocaliserConfig::default());
        reloc.save_to_disk(dir.path()).unwrap();
        assert!(ForestRelocaliser::model_path(dir.path()).exists());

        let mut other = scene(ForestRelocaliserConfig::default());
        other.load_from_disk(dir.path()).unwrap();
        assert_eq!(other.model(), reloc.model());
    }

    #[test]
    fn test_sample_three_indices_unique() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let [a, b, c] = sample_three_indices(&mut rng, 3);
            assert!(a != b && a != c && b != c);
        }
    }
}
