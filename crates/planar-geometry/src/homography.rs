use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, HomographyError};
use crate::homogeneous::{Line2D, Point2D, W_EPSILON};
use crate::linalg::{self, Mat33};

/// Homographies whose Frobenius-normalized determinant is below this value
/// are treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// A projective transformation of the plane, stored as a row-major 3x3 matrix.
///
/// A homography is defined up to a non-zero scale: `H` and `s * H` describe the
/// same mapping. Use [`Homography::normalized`] for a canonical representative
/// and [`Homography::distance_up_to_scale`] to compare two estimates.
///
/// # Example
///
/// ```
/// use planar_geometry::{Homography, Point2D};
///
/// let h = Homography::from_array([[2.0, 0.0, 10.0], [0.0, 2.0, 20.0], [0.0, 0.0, 1.0]]);
/// let p = h.transform_point(&Point2D::from_pixel([1.0, 1.0]));
/// assert_eq!(p.to_pixel().unwrap(), [12.0, 22.0]);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography(Mat33);

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<Mat33> for Homography {
    fn from(m: Mat33) -> Self {
        Self(m)
    }
}

impl Homography {
    /// Wrap a row-major 3x3 matrix.
    pub const fn from_array(m: Mat33) -> Self {
        Self(m)
    }

    /// The identity mapping.
    pub const fn identity() -> Self {
        Self(linalg::IDENTITY)
    }

    /// Build from the 9 entries in row-major order.
    pub fn from_row_major(h: &[f64; 9]) -> Self {
        Self([[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], h[8]]])
    }

    /// The 9 entries in row-major order.
    pub fn to_row_major(&self) -> [f64; 9] {
        let m = &self.0;
        [
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        ]
    }

    /// Borrow the underlying matrix.
    pub fn as_array(&self) -> &Mat33 {
        &self.0
    }

    /// The determinant of the matrix.
    pub fn det(&self) -> f64 {
        linalg::det_mat33(&self.0)
    }

    /// The Frobenius norm of the matrix.
    pub fn frobenius_norm(&self) -> f64 {
        linalg::frobenius_norm_mat33(&self.0)
    }

    /// Whether the matrix is too close to singular to be used as a transform.
    pub fn is_degenerate(&self) -> bool {
        let det = linalg::normalized_det_mat33(&self.0);
        !det.is_finite() || det.abs() < SINGULAR_EPSILON
    }

    /// The inverse mapping.
    ///
    /// # Errors
    ///
    /// Fails with [`HomographyError::DegenerateTransform`] when the determinant
    /// of the Frobenius-normalized matrix is below [`SINGULAR_EPSILON`].
    pub fn inverse(&self) -> Result<Self, HomographyError> {
        let det = linalg::normalized_det_mat33(&self.0);
        if self.is_degenerate() {
            return Err(HomographyError::DegenerateTransform(det));
        }
        linalg::inverse_mat33(&self.0)
            .map(Self)
            .ok_or(HomographyError::DegenerateTransform(det))
    }

    /// Map a homogeneous point: `H * p`.
    pub fn transform_point(&self, p: &Point2D) -> Point2D {
        Point2D::from_array(linalg::mul_mat33_vec3(&self.0, &p.to_array()))
    }

    /// Map a pixel position and return the resulting pixel position.
    ///
    /// # Errors
    ///
    /// Fails with [`GeometryError::DegenerateGeometry`] when the point is mapped
    /// to infinity.
    pub fn transform_xy(&self, p: [f64; 2]) -> Result<[f64; 2], GeometryError> {
        self.project(p).ok_or_else(|| {
            GeometryError::DegenerateGeometry(format!(
                "point ({}, {}) is mapped to infinity",
                p[0], p[1]
            ))
        })
    }

    /// Map a pixel position, `None` when the image lies at infinity.
    ///
    /// Non-allocating form of [`Homography::transform_xy`] for per-pixel loops.
    #[inline]
    pub fn project(&self, p: [f64; 2]) -> Option<[f64; 2]> {
        let m = &self.0;
        let w = m[2][0] * p[0] + m[2][1] * p[1] + m[2][2];
        if w.abs() < W_EPSILON {
            return None;
        }
        let x = m[0][0] * p[0] + m[0][1] * p[1] + m[0][2];
        let y = m[1][0] * p[0] + m[1][1] * p[1] + m[1][2];
        Some([x / w, y / w])
    }

    /// Map a line: `H^-T * l`.
    ///
    /// If `p` lies on `l`, then `H p` lies on the transformed line.
    pub fn transform_line(&self, l: &Line2D) -> Result<Line2D, HomographyError> {
        let inv_t = linalg::transpose_mat33(&self.inverse()?.0);
        Ok(Line2D::from_array(linalg::mul_mat33_vec3(
            &inv_t,
            &l.to_array(),
        )))
    }

    /// The composition `self * other`: `other` is applied first.
    pub fn compose(&self, other: &Homography) -> Homography {
        Self(linalg::mul_mat33(&self.0, &other.0))
    }

    /// The canonical representative of the scale class.
    ///
    /// Divides by `h33` when it is not (relatively) zero, otherwise scales to
    /// unit Frobenius norm.
    pub fn normalized(&self) -> Homography {
        let norm = self.frobenius_norm();
        if norm == 0.0 {
            return *self;
        }
        let h33 = self.0[2][2];
        if h33.abs() > W_EPSILON * norm {
            Self(linalg::scale_mat33(&self.0, 1.0 / h33))
        } else {
            Self(linalg::scale_mat33(&self.0, 1.0 / norm))
        }
    }

    /// The relative Frobenius distance between two homographies, ignoring scale.
    ///
    /// Both matrices are scaled to unit Frobenius norm and the sign of `other`
    /// is aligned with `self` before taking the norm of the difference. Two
    /// matrices describing the same mapping yield 0.
    pub fn distance_up_to_scale(&self, other: &Homography) -> f64 {
        let (na, nb) = (self.frobenius_norm(), other.frobenius_norm());
        if na == 0.0 || nb == 0.0 {
            return f64::INFINITY;
        }
        let a = self.to_row_major().map(|v| v / na);
        let b = other.to_row_major().map(|v| v / nb);

        let dot: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        let sign = if dot < 0.0 { -1.0 } else { 1.0 };

        a.iter()
            .zip(&b)
            .map(|(x, y)| (x - sign * y).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl std::ops::Mul for Homography {
    type Output = Homography;

    fn mul(self, rhs: Homography) -> Self::Output {
        self.compose(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homogeneous::{is_incident, line_through};
    use approx::assert_relative_eq;

    fn sample_homography() -> Homography {
        Homography::from_array([
            [1.2, 0.1, 15.0],
            [-0.05, 0.9, -7.0],
            [1e-4, -2e-4, 1.0],
        ])
    }

    #[test]
    fn test_inverse_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let h = sample_homography();
        let h_inv = h.inverse()?;

        for p in [[0.0, 0.0], [100.0, 50.0], [-40.0, 320.0], [639.0, 479.0]] {
            let q = h.transform_point(&Point2D::from_pixel(p));
            let back = h_inv.transform_point(&q).normalized()?;
            assert_relative_eq!(back.x, p[0], epsilon = 1e-9, max_relative = 1e-9);
            assert_relative_eq!(back.y, p[1], epsilon = 1e-9, max_relative = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_inverse_singular() {
        let h = Homography::from_array([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]);
        assert!(h.is_degenerate());
        assert!(matches!(
            h.inverse(),
            Err(HomographyError::DegenerateTransform(_))
        ));
    }

    #[test]
    fn test_transform_line_preserves_incidence() -> Result<(), Box<dyn std::error::Error>> {
        let h = sample_homography();
        let p = Point2D::from_pixel([10.0, 20.0]);
        let q = Point2D::from_pixel([200.0, -30.0]);
        let l = line_through(&p, &q)?;

        let hl = h.transform_line(&l)?;
        assert!(is_incident(&h.transform_point(&p), &hl, 1e-12));
        assert!(is_incident(&h.transform_point(&q), &hl, 1e-12));
        Ok(())
    }

    #[test]
    fn test_normalized_and_distance() {
        let h = sample_homography();
        let scaled = Homography::from_array(linalg::scale_mat33(h.as_array(), -3.5));

        assert!(h.distance_up_to_scale(&scaled) < 1e-12);
        let n = scaled.normalized();
        assert_relative_eq!(n.as_array()[2][2], 1.0);
        assert_relative_eq!(n.as_array()[0][2], 15.0, epsilon = 1e-12);

        assert!(h.distance_up_to_scale(&Homography::identity()) > 1e-3);
    }

    #[test]
    fn test_normalized_zero_h33() {
        let h = Homography::from_array([[0.0, 2.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        let n = h.normalized();
        assert_relative_eq!(n.frobenius_norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compose() -> Result<(), GeometryError> {
        let scale = Homography::from_array([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]]);
        let shift = Homography::from_array([[1.0, 0.0, 10.0], [0.0, 1.0, 20.0], [0.0, 0.0, 1.0]]);

        // scale first, then shift
        let h = shift * scale;
        assert_eq!(h.transform_xy([1.0, 1.0])?, [12.0, 22.0]);
        assert_eq!(scale.compose(&shift).transform_xy([1.0, 1.0])?, [22.0, 42.0]);
        Ok(())
    }

    #[test]
    fn test_transform_xy_to_infinity() {
        let h = Homography::from_array([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, -1.0]]);
        assert!(h.transform_xy([1.0, 5.0]).is_err());
    }

    #[test]
    fn test_serde_round_trip() -> Result<(), serde_json::Error> {
        let h = sample_homography();
        let json = serde_json::to_string(&h)?;
        let back: Homography = serde_json::from_str(&json)?;
        assert!(h.distance_up_to_scale(&back) < 1e-12);
        Ok(())
    }
}
