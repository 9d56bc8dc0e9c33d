//! Frame-level data: images, calibration and the per-frame view.

pub mod camera;

use image::{GrayImage, ImageBuffer, Luma, RgbaImage};

pub use camera::{CameraModel, ImageSize, Intrinsics, RgbdCalibration};

/// Raw sensor depth (sensor units, 0 = no measurement).
pub type RawDepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Metric depth in metres; values `<= 0` are invalid.
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel validity mask; zero means "ignore this depth sample".
pub type MaskImage = GrayImage;

/// Depth value written into masked-out pixels.
pub const INVALID_DEPTH: f32 = -1.0;

/// Colour and metric depth for the current frame, as produced by a view builder.
#[derive(Debug, Clone)]
pub struct View {
    pub rgb: RgbaImage,
    pub depth: DepthImage,
    pub calib: RgbdCalibration,
}

impl View {
    pub fn depth_intrinsics(&self) -> &Intrinsics {
        &self.calib.depth.intrinsics
    }

    /// Swap in a masked copy of the depth image and return the original.
    ///
    /// Returns `None` (leaving the view untouched) if the mask size does not
    /// match the depth image.
    pub fn apply_depth_mask(&mut self, mask: &MaskImage) -> Option<DepthImage> {
        if mask.dimensions() != self.depth.dimensions() {
            return None;
        }

        let mut masked = self.depth.clone();
        for (d, m) in masked.pixels_mut().zip(mask.pixels()) {
            if m.0[0] == 0 {
                d.0[0] = INVALID_DEPTH;
            }
        }
        Some(std::mem::replace(&mut self.depth, masked))
    }

    /// Put back a depth image previously returned by `apply_depth_mask`.
    pub fn restore_depth(&mut self, original: DepthImage) {
        self.depth = original;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> View {
        let model = CameraModel {
            size: ImageSize::new(2, 2),
            intrinsics: Intrinsics::new(1.0, 1.0, 1.0, 1.0),
        };
        View {
            rgb: RgbaImage::new(2, 2),
            depth: DepthImage::from_pixel(2, 2, Luma([1.5])),
            calib: RgbdCalibration::shared(model),
        }
    }

    #[test]
    fn test_mask_applied_and_restored() {
        let mut view = view();
        let mut mask = MaskImage::from_pixel(2, 2, Luma([255]));
        mask.put_pixel(1, 0, Luma([0]));

        let original = view.apply_depth_mask(&mask).unwrap();
        assert_eq!(view.depth.get_pixel(1, 0).0[0], INVALID_DEPTH);
        assert_eq!(view.depth.get_pixel(0, 0).0[0], 1.5);

        view.restore_depth(original);
        assert!(view.depth.pixels().all(|p| p.0[0] == 1.5));
    }

    #[test]
    fn test_mismatched_mask_ignored() {
        let mut view = view();
        let mask = MaskImage::new(3, 3);

        assert!(view.apply_depth_mask(&mask).is_none());
        assert!(view.depth.pixels().all(|p| p.0[0] == 1.5));
    }
}
