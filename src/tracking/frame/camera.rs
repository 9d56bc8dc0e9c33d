//! Pinhole intrinsics and RGB-D calibration.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Pinhole projection parameters (focal lengths and principal point).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Back-project pixel `(u, v)` with metric depth `z` to camera space.
    pub fn unproject(&self, u: f64, v: f64, z: f64) -> Vector3<f64> {
        Vector3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }

    /// Project a camera-space point; `None` behind the camera.
    pub fn project(&self, p: &Vector3<f64>) -> Option<(f64, f64)> {
        if p.z <= 0.0 {
            return None;
        }
        Some((self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy))
    }
}

/// Calibration of one camera of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub size: ImageSize,
    pub intrinsics: Intrinsics,
}

/// Colour + depth calibration of an RGB-D sensor.
///
/// Raw depth values are converted to metres as `raw * depth_scale + depth_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbdCalibration {
    pub rgb: CameraModel,
    pub depth: CameraModel,
    pub depth_scale: f64,
    pub depth_offset: f64,
}

impl RgbdCalibration {
    /// Same model for both cameras, millimetre depth.
    pub fn shared(model: CameraModel) -> Self {
        Self {
            rgb: model,
            depth: model,
            depth_scale: 0.001,
            depth_offset: 0.0,
        }
    }

    pub fn depth_to_metres(&self, raw: u16) -> f32 {
        if raw == 0 {
            return -1.0;
        }
        (raw as f64 * self.depth_scale + self.depth_offset) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unproject_then_project() {
        let k = Intrinsics::new(525.0, 525.0, 319.5, 239.5);
        let p = k.unproject(100.0, 50.0, 2.0);
        let (u, v) = k.project(&p).unwrap();

        assert_relative_eq!(u, 100.0, epsilon = 1e-9);
        assert_relative_eq!(v, 50.0, epsilon = 1e-9);
        assert!(k.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn test_zero_raw_depth_is_invalid() {
        let calib = RgbdCalibration::shared(CameraModel {
            size: ImageSize::new(4, 4),
            intrinsics: Intrinsics::new(1.0, 1.0, 2.0, 2.0),
        });

        assert!(calib.depth_to_metres(0) < 0.0);
        assert_relative_eq!(calib.depth_to_metres(1500), 1.5, epsilon = 1e-6);
    }
}
