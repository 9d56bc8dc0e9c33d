//! Text files written next to saved models.
//!
//! - `calib.txt`: RGB-D calibration in the InfiniTAM text layout
//! - `settings.ini`: relocaliser type and volumetric scene parameters

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::system::settings::SceneParams;
use crate::tracking::frame::{CameraModel, RgbdCalibration};

pub const CALIBRATION_FILE: &str = "calib.txt";
pub const SETTINGS_FILE: &str = "settings.ini";

fn write_camera(out: &mut impl Write, camera: &CameraModel) -> std::io::Result<()> {
    let k = &camera.intrinsics;
    writeln!(out, "{} {}", camera.size.width, camera.size.height)?;
    writeln!(out, "{} {}", k.fx, k.fy)?;
    writeln!(out, "{} {}", k.cx, k.cy)
}

/// Colour intrinsics, depth intrinsics, identity colour-to-depth
/// extrinsics and the affine raw-depth conversion, separated by blank lines.
pub fn format_rgbd_calibration(calib: &RgbdCalibration, out: &mut impl Write) -> std::io::Result<()> {
    write_camera(out, &calib.rgb)?;
    writeln!(out)?;
    write_camera(out, &calib.depth)?;
    writeln!(out)?;
    writeln!(out, "1 0 0 0")?;
    writeln!(out, "0 1 0 0")?;
    writeln!(out, "0 0 1 0")?;
    writeln!(out)?;
    writeln!(out, "affine {} {}", calib.depth_scale, calib.depth_offset)
}

pub fn write_rgbd_calibration(path: &Path, calib: &RgbdCalibration) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    format_rgbd_calibration(calib, &mut out).with_context(|| format!("Failed to write {:?}", path))?;
    out.flush()?;
    Ok(())
}

pub fn format_settings_ini(relocaliser_type: &str, params: &SceneParams, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "relocaliserType = {}", relocaliser_type)?;
    writeln!(out)?;
    writeln!(out, "[SceneParams]")?;
    writeln!(out, "mu = {}", params.mu)?;
    writeln!(out, "viewFrustum_max = {}", params.view_frustum_max)?;
    writeln!(out, "viewFrustum_min = {}", params.view_frustum_min)?;
    writeln!(out, "voxelSize = {}", params.voxel_size)
}

pub fn write_settings_ini(path: &Path, relocaliser_type: &str, params: &SceneParams) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    format_settings_ini(relocaliser_type, params, &mut out).with_context(|| format!("Failed to write {:?}", path))?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::{ImageSize, Intrinsics};

    #[test]
    fn test_calibration_layout() {
        let mut calib = RgbdCalibration::shared(CameraModel {
            size: ImageSize::new(640, 480),
            intrinsics: Intrinsics::new(525.0, 525.0, 319.5, 239.5),
        });
        calib.depth.intrinsics.fx = 570.5;

        let mut out = Vec::new();
        format_rgbd_calibration(&calib, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "640 480");
        assert_eq!(lines[1], "525 525");
        assert_eq!(lines[2], "319.5 239.5");
        assert_eq!(lines[3], "");
        assert_eq!(lines[5], "570.5 525");
        assert_eq!(lines[8], "1 0 0 0");
        assert_eq!(lines.last().copied(), Some("affine 0.001 0"));
    }

    #[test]
    fn test_settings_ini_layout() {
        let mut out = Vec::new();
        format_settings_ini("forest", &SceneParams::default(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "relocaliserType = forest\n\n[SceneParams]\nmu = 0.02\nviewFrustum_max = 3\nviewFrustum_min = 0.2\nvoxelSize = 0.005\n"
        );
    }

    #[test]
    fn test_files_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let calib_path = dir.path().join(CALIBRATION_FILE);
        let calib = RgbdCalibration::shared(CameraModel {
            size: ImageSize::new(4, 4),
            intrinsics: Intrinsics::new(2.0, 2.0, 2.0, 2.0),
        });

        write_rgbd_calibration(&calib_path, &calib).unwrap();
        write_settings_ini(&dir.path().join(SETTINGS_FILE), "none", &SceneParams::default()).unwrap();

        assert!(std::fs::read_to_string(calib_path).unwrap().starts_with("4 4\n2 2\n"));
        assert!(dir.path().join(SETTINGS_FILE).exists());
    }
}
