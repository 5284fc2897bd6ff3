use opencv::prelude::*;

extern crate nalgebra as na;

/// A calibrated monocular camera: pinhole intrinsics plus the 5-element
/// OpenCV distortion vector `(k1, k2, p1, p2, k3)`.
///
/// The intrinsics arrive with every observation batch, so this type is cheap
/// to copy and carries no OpenCV state; the `Mat` forms are built on demand
/// for the PnP calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraInfo {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub distortion: [f64; 5],
}

impl CameraInfo {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, distortion: [f64; 5]) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion,
        }
    }

    /// Build from a row-major 3x3 intrinsic matrix and distortion vector, the
    /// layout used by camera-info messages.
    pub fn from_k_d(k: &[f64; 9], d: &[f64; 5]) -> Self {
        Self {
            fx: k[0],
            cx: k[2],
            fy: k[4],
            cy: k[5],
            distortion: *d,
        }
    }

    /// The intrinsic matrix as an owned OpenCV `Mat`.
    pub fn camera_mat(&self) -> opencv::Result<Mat> {
        let data = [
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        ];
        Mat::new_rows_cols_with_data(3, 3, &data)?.try_clone()
    }

    /// The distortion coefficients as an owned OpenCV `Mat`.
    pub fn dist_coeffs(&self) -> opencv::Result<Mat> {
        Mat::new_rows_cols_with_data(5, 1, &self.distortion)?.try_clone()
    }

    pub fn camera_mat_na(&self) -> na::Matrix3<f64> {
        na::Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point to pixel coordinates through the pinhole
    /// model with Brown-Conrady distortion.
    ///
    /// This is the same model OpenCV applies in its PnP routines; the
    /// factor-graph residuals and the synthetic tests share it so both
    /// backends see one projection.
    pub fn project(&self, p_camera: &na::Point3<f64>) -> na::Point2<f64> {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let xp = p_camera.x / p_camera.z;
        let yp = p_camera.y / p_camera.z;
        let r2 = xp * xp + yp * yp;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let xpp = xp * radial + 2.0 * p1 * xp * yp + p2 * (r2 + 2.0 * xp * xp);
        let ypp = yp * radial + p1 * (r2 + 2.0 * yp * yp) + 2.0 * p2 * xp * yp;
        na::Point2::new(self.fx * xpp + self.cx, self.fy * ypp + self.cy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_principal_ray() {
        let camera = CameraInfo::new(600.0, 600.0, 320.0, 240.0, [0.0; 5]);
        let pixel = camera.project(&na::Point3::new(0.0, 0.0, 2.0));
        assert!((pixel.x - 320.0).abs() < 1e-12);
        assert!((pixel.y - 240.0).abs() < 1e-12);
    }

    #[test]
    fn test_project_linear() {
        let camera = CameraInfo::new(600.0, 500.0, 320.0, 240.0, [0.0; 5]);
        let pixel = camera.project(&na::Point3::new(0.1, -0.2, 1.0));
        assert!((pixel.x - (320.0 + 600.0 * 0.1)).abs() < 1e-12);
        assert!((pixel.y - (240.0 - 500.0 * 0.2)).abs() < 1e-12);
    }

    #[test]
    fn test_project_radial_distortion_pushes_outward() {
        let undistorted = CameraInfo::new(600.0, 600.0, 320.0, 240.0, [0.0; 5]);
        let distorted = CameraInfo::new(600.0, 600.0, 320.0, 240.0, [0.1, 0.0, 0.0, 0.0, 0.0]);
        let p = na::Point3::new(0.3, 0.0, 1.0);
        let a = undistorted.project(&p);
        let b = distorted.project(&p);
        assert!(b.x > a.x);
        assert!((b.y - a.y).abs() < 1e-12);
    }

    #[test]
    fn test_from_k_d() {
        let k = [600.0, 0.0, 320.0, 0.0, 610.0, 240.0, 0.0, 0.0, 1.0];
        let d = [0.1, 0.01, 0.001, -0.001, 0.0001];
        let camera = CameraInfo::from_k_d(&k, &d);
        assert_eq!(camera.fx, 600.0);
        assert_eq!(camera.fy, 610.0);
        assert_eq!(camera.cx, 320.0);
        assert_eq!(camera.cy, 240.0);
        assert_eq!(camera.distortion, d);
        assert_eq!(camera.camera_mat_na()[(0, 0)], 600.0);
        assert_eq!(camera.camera_mat_na()[(1, 2)], 240.0);
    }
}
