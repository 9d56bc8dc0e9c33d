//! Image-level drivers for the forest kernel.
//!
//! Every pixel is processed independently, so both passes map over the pixel
//! grid in parallel when the `rayon` feature is enabled.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::model::ForestModel;
use super::prediction::LeafPrediction;

/// Dense per-pixel descriptors stored row-major, `dims` floats per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorImage {
    pub width: usize,
    pub height: usize,
    pub dims: usize,
    pub data: Vec<f32>,
}

impl DescriptorImage {
    pub fn new(width: usize, height: usize, dims: usize) -> Self {
        Self {
            width,
            height,
            dims,
            data: vec![0.0; width * height * dims],
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn descriptor(&self, pixel: usize) -> &[f32] {
        &self.data[pixel * self.dims..(pixel + 1) * self.dims]
    }

    pub fn descriptor_mut(&mut self, pixel: usize) -> &mut [f32] {
        &mut self.data[pixel * self.dims..(pixel + 1) * self.dims]
    }
}

/// Leaf indices reached by every pixel, one entry per tree.
///
/// Always yields `num_pixels()` rows; zero-length descriptors descend as if
/// every feature were zero.
pub fn evaluate_forest(model: &ForestModel, descriptors: &DescriptorImage) -> Vec<Vec<u32>> {
    let forest = model.forest();

    #[cfg(not(feature = "rayon"))]
    {
        (0..descriptors.num_pixels())
            .map(|pixel| forest.descend(descriptors.descriptor(pixel)))
            .collect()
    }
    #[cfg(feature = "rayon")]
    {
        (0..descriptors.num_pixels())
            .into_par_iter()
            .map(|pixel| forest.descend(descriptors.descriptor(pixel)))
            .collect()
    }
}

/// Merged mode list for every pixel given its leaf indices.
pub fn predictions_for_leaves(model: &ForestModel, leaf_indices: &[Vec<u32>]) -> Vec<LeafPrediction> {
    #[cfg(not(feature = "rayon"))]
    {
        leaf_indices
            .iter()
            .map(|leaves| model.prediction_for_leaves(leaves))
            .collect()
    }
    #[cfg(feature = "rayon")]
    {
        leaf_indices
            .par_iter()
            .map(|leaves| model.prediction_for_leaves(leaves))
            .collect()
    }
}

/// Both passes in one call.
pub fn predict_image(model: &ForestModel, descriptors: &DescriptorImage) -> Vec<LeafPrediction> {
    let leaves = evaluate_forest(model, descriptors);
    predictions_for_leaves(model, &leaves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::model::tests::small_model;

    fn image() -> DescriptorImage {
        let mut img = DescriptorImage::new(2, 2, 2);
        img.descriptor_mut(0).copy_from_slice(&[0.1, -1.0]);
        img.descriptor_mut(1).copy_from_slice(&[1.0, 1.0]);
        img.descriptor_mut(2).copy_from_slice(&[3.0, 1.0]);
        img.descriptor_mut(3).copy_from_slice(&[0.1, 1.0]);
        img
    }

    #[test]
    fn test_evaluate_forest_per_pixel() {
        let model = small_model();
        let leaves = evaluate_forest(&model, &image());

        assert_eq!(leaves, vec![vec![0, 0], vec![1, 1], vec![1, 2], vec![0, 1]]);
    }

    #[test]
    fn test_predict_image_matches_single_pixel_path() {
        let model = small_model();
        let img = image();
        let preds = predict_image(&model, &img);

        assert_eq!(preds.len(), img.num_pixels());
        for (pixel, pred) in preds.iter().enumerate() {
            assert_eq!(*pred, model.predict(img.descriptor(pixel)));
        }
        // Pixel 2 reaches a 30-inlier mode in tree 1, which outranks tree 0.
        assert_eq!(preds[2].best().unwrap().inliers, 30);
    }

    #[test]
    fn test_zero_dimension_descriptors_yield_row_per_pixel() {
        let model = small_model();
        let img = DescriptorImage::new(3, 2, 0);
        let leaves = evaluate_forest(&model, &img);

        assert_eq!(leaves.len(), 6);
        let zeros = model.forest().descend(&[]);
        assert!(leaves.iter().all(|l| *l == zeros));
    }
}
