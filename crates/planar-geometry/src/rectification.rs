//! Affine and metric rectification of a plane from imaged line configurations.
//!
//! Rectification is stratified: the affine step sends the imaged line at
//! infinity back to `(0, 0, 1)`, the metric step then removes the remaining
//! affine distortion using pairs of lines known to be orthogonal in the world.

use crate::error::GeometryError;
use crate::homogeneous::{intersection, line_through, Line2D, W_EPSILON};
use crate::homography::Homography;

/// The affine rectification homography for an imaged line at infinity.
///
/// For the vanishing line `l = (l1, l2, l3)` this is
/// `[[1, 0, 0], [0, 1, 0], [l1 / l3, l2 / l3, 1]]`, which maps `l` to the line
/// at infinity.
///
/// # Errors
///
/// Fails with [`GeometryError::DegenerateGeometry`] when `l3` vanishes, i.e.
/// the vanishing line passes through the image origin.
pub fn affine_rectification(vanishing_line: &Line2D) -> Result<Homography, GeometryError> {
    let [l1, l2, l3] = vanishing_line.to_array();
    let norm = (l1 * l1 + l2 * l2 + l3 * l3).sqrt();
    if l3.abs() <= W_EPSILON * norm || norm == 0.0 {
        return Err(GeometryError::DegenerateGeometry(format!(
            "vanishing line ({l1}, {l2}, {l3}) passes through the origin"
        )));
    }
    Ok(Homography::from_array([
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [l1 / l3, l2 / l3, 1.0],
    ]))
}

/// The imaged line at infinity from two pairs of imaged parallel lines.
///
/// Each pair meets at a vanishing point; the line through both vanishing
/// points is returned.
pub fn vanishing_line(
    parallel_a: (&Line2D, &Line2D),
    parallel_b: (&Line2D, &Line2D),
) -> Result<Line2D, GeometryError> {
    let v1 = intersection(parallel_a.0, parallel_a.1);
    let v2 = intersection(parallel_b.0, parallel_b.1);
    if v1.to_array().iter().all(|c| *c == 0.0) || v2.to_array().iter().all(|c| *c == 0.0) {
        return Err(GeometryError::DegenerateGeometry(
            "a pair of parallel lines coincides".to_string(),
        ));
    }
    line_through(&v1, &v2)
}

/// Affine rectification from two pairs of imaged parallel lines.
///
/// Pairs that are already parallel in the image contribute a vanishing point
/// at infinity; if both are, the result is the identity.
///
/// # Errors
///
/// Fails with [`GeometryError::DegenerateGeometry`] when both pairs share the
/// same vanishing point or the vanishing line passes through the origin.
pub fn affine_rectification_from_parallel_pairs(
    parallel_a: (&Line2D, &Line2D),
    parallel_b: (&Line2D, &Line2D),
) -> Result<Homography, GeometryError> {
    let l_inf = vanishing_line(parallel_a, parallel_b)?;
    affine_rectification(&l_inf)
}

/// Metric rectification of an affinely rectified image from two pairs of
/// imaged orthogonal lines.
///
/// Each pair `(l, m)` gives the constraint `(l1, l2) S (m1, m2)^T = 0` on the
/// symmetric `2x2` matrix `S`, the affine part of the imaged dual conic. The
/// two constraints fix `S` up to scale; it must be positive definite. With the
/// upper-triangular Cholesky factorization `S = K K^T`, the rectifying
/// homography is `[[K, 0], [0, 1]]^-1`.
///
/// The result is defined up to a similarity.
///
/// # Errors
///
/// Fails with [`GeometryError::DegenerateGeometry`] when the constraints are
/// dependent or `S` is not positive definite (inconsistent input, or an image
/// that is not affinely rectified).
pub fn metric_rectification_from_orthogonal_pairs(
    orthogonal: [(&Line2D, &Line2D); 2],
) -> Result<Homography, GeometryError> {
    let row = |l: &Line2D, m: &Line2D| -> [f64; 3] {
        let l = [l.a, l.b];
        let m = [m.a, m.b];
        [l[0] * m[0], l[0] * m[1] + l[1] * m[0], l[1] * m[1]]
    };
    let r1 = row(orthogonal[0].0, orthogonal[0].1);
    let r2 = row(orthogonal[1].0, orthogonal[1].1);

    // null vector of the 2x3 constraint matrix
    let s = crate::linalg::cross3(&r1, &r2);
    let scale = crate::linalg::norm3(&s);
    if scale <= W_EPSILON * crate::linalg::norm3(&r1) * crate::linalg::norm3(&r2) {
        return Err(GeometryError::DegenerateGeometry(
            "orthogonality constraints are dependent".to_string(),
        ));
    }

    let sign = if s[0] < 0.0 { -1.0 } else { 1.0 };
    let (s11, s12, s22) = (sign * s[0] / scale, sign * s[1] / scale, sign * s[2] / scale);
    if s11 <= 0.0 || s22 <= 0.0 || s11 * s22 - s12 * s12 <= W_EPSILON {
        return Err(GeometryError::DegenerateGeometry(format!(
            "dual conic block [[{s11}, {s12}], [{s12}, {s22}]] is not positive definite"
        )));
    }

    // S = K K^T with K = [[a, b], [0, c]]
    let c = s22.sqrt();
    let b = s12 / c;
    let a = (s11 - b * b).sqrt();

    // [[K, 0], [0, 1]]^-1 with K^-1 = [[1/a, -b/(a c)], [0, 1/c]]
    Ok(Homography::from_array([
        [1.0 / a, -b / (a * c), 0.0],
        [0.0, 1.0 / c, 0.0],
        [0.0, 0.0, 1.0],
    ]))
}
