use crate::utils::normalize_angle;

extern crate nalgebra as na;

/// A rigid transform in SE(3) carrying a 6x6 covariance over
/// `(x, y, z, roll, pitch, yaw)`.
///
/// `Invalid` is the "no solution" sentinel: a PnP or optimizer failure
/// propagates as an `Invalid` value and consumers must check [`is_valid`]
/// before composing or writing through it. This keeps the solvers free of
/// error returns while still distinguishing "no solution" from the identity
/// transform.
///
/// [`is_valid`]: TransformWithCovariance::is_valid
#[derive(Debug, Clone, PartialEq)]
pub enum TransformWithCovariance {
    Invalid,
    Valid {
        t: na::Isometry3<f64>,
        cov: na::Matrix6<f64>,
    },
}

impl TransformWithCovariance {
    pub fn identity() -> Self {
        Self::Valid {
            t: na::Isometry3::identity(),
            cov: na::Matrix6::zeros(),
        }
    }

    /// Wrap a bare isometry with a zero covariance.
    pub fn from_isometry(t: na::Isometry3<f64>) -> Self {
        Self::Valid {
            t,
            cov: na::Matrix6::zeros(),
        }
    }

    pub fn from_isometry_with_covariance(t: na::Isometry3<f64>, cov: na::Matrix6<f64>) -> Self {
        Self::Valid { t, cov }
    }

    /// Build from a `(x, y, z, roll, pitch, yaw)` mean and a row-major
    /// 36-entry covariance.
    pub fn from_mean_and_covariance(mean: &[f64; 6], cov: &[f64; 36]) -> Self {
        let t = na::Isometry3::from_parts(
            na::Translation3::new(mean[0], mean[1], mean[2]),
            na::UnitQuaternion::from_euler_angles(mean[3], mean[4], mean[5]),
        );
        Self::Valid {
            t,
            cov: na::Matrix6::from_row_slice(cov),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn isometry(&self) -> Option<&na::Isometry3<f64>> {
        match self {
            Self::Valid { t, .. } => Some(t),
            Self::Invalid => None,
        }
    }

    pub fn covariance(&self) -> Option<&na::Matrix6<f64>> {
        match self {
            Self::Valid { cov, .. } => Some(cov),
            Self::Invalid => None,
        }
    }

    /// The `(x, y, z, roll, pitch, yaw)` mean vector.
    pub fn mean(&self) -> Option<na::Vector6<f64>> {
        self.isometry().map(|t| {
            let (roll, pitch, yaw) = t.rotation.euler_angles();
            na::Vector6::new(
                t.translation.x,
                t.translation.y,
                t.translation.z,
                roll,
                pitch,
                yaw,
            )
        })
    }

    /// Rigid composition `self * other`.
    ///
    /// The covariance is not propagated through composition; the result
    /// carries a zero covariance. Callers that need a composed uncertainty use
    /// the factor-graph marginals instead.
    pub fn compose(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Valid { t: a, .. }, Self::Valid { t: b, .. }) => Self::from_isometry(a * b),
            _ => Self::Invalid,
        }
    }

    /// Invert the SE(3) part. The covariance is carried through unchanged; an
    /// inverted transform is only ever used as an initial estimate.
    pub fn inverse(&self) -> Self {
        match self {
            Self::Valid { t, cov } => Self::Valid {
                t: t.inverse(),
                cov: *cov,
            },
            Self::Invalid => Self::Invalid,
        }
    }

    pub fn transform_point(&self, point: &na::Point3<f64>) -> Option<na::Point3<f64>> {
        self.isometry().map(|t| t.transform_point(point))
    }

    /// Fold another estimate into this one as a running component-wise mean
    /// with weight `count` on the current value. Yaw is averaged through a
    /// shortest-arc normalization so estimates straddling the $\pm\pi$ cut do
    /// not cancel. The covariance is left unchanged.
    pub fn update_simple_average(&mut self, other: &Self, count: u32) {
        let (Some(mut mean), Some(other_mean)) = (self.mean(), other.mean()) else {
            return;
        };
        let weight = 1.0 / (count as f64 + 1.0);
        for i in 0..5 {
            mean[i] += (other_mean[i] - mean[i]) * weight;
        }
        mean[5] = normalize_angle(mean[5] + normalize_angle(other_mean[5] - mean[5]) * weight);
        if let Self::Valid { t, .. } = self {
            *t = na::Isometry3::from_parts(
                na::Translation3::new(mean[0], mean[1], mean[2]),
                na::UnitQuaternion::from_euler_angles(mean[3], mean[4], mean[5]),
            );
        }
    }
}
