use crate::correspondences::Correspondences;
use crate::error::HomographyError;
use crate::homography::Homography;
use crate::linalg::{self, Mat33};

/// Minimum number of correspondences for a homography.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Relative size of the second smallest singular value below which the null
/// space of the design matrix is not one-dimensional.
const RANK_TOLERANCE: f64 = 1e-9;

/// Similarity normalization of a point set.
///
/// Translates the centroid to the origin and scales so that the mean distance
/// to the origin is `sqrt(2)`. Returns the normalized points and the
/// transform `T` with `x_norm = T * x`.
///
/// # Errors
///
/// Fails with [`HomographyError::DegenerateConfiguration`] when all points
/// coincide or the input is empty.
pub fn normalize_points_2d(x: &[[f64; 2]]) -> Result<(Vec<[f64; 2]>, Mat33), HomographyError> {
    let n = x.len();
    if n == 0 {
        return Err(HomographyError::DegenerateConfiguration(
            "cannot normalize an empty point set".to_string(),
        ));
    }

    let (mut mx, mut my) = (0.0, 0.0);
    for p in x {
        mx += p[0];
        my += p[1];
    }
    mx /= n as f64;
    my /= n as f64;

    let mut mean_dist = 0.0;
    for p in x {
        mean_dist += (p[0] - mx).hypot(p[1] - my);
    }
    mean_dist /= n as f64;

    if !mean_dist.is_finite() || mean_dist <= f64::EPSILON * (mx.abs() + my.abs()).max(1.0) {
        return Err(HomographyError::DegenerateConfiguration(
            "all points coincide".to_string(),
        ));
    }
    let scale = std::f64::consts::SQRT_2 / mean_dist;

    let xn = x
        .iter()
        .map(|p| [(p[0] - mx) * scale, (p[1] - my) * scale])
        .collect();

    // T = [[s, 0, -s*mx], [0, s, -s*my], [0, 0, 1]]
    let t = [
        [scale, 0.0, -scale * mx],
        [0.0, scale, -scale * my],
        [0.0, 0.0, 1.0],
    ];
    Ok((xn, t))
}

/// Estimate the homography mapping `x1` onto `x2` with the normalized DLT.
///
/// Both point sets are conditioned with [`normalize_points_2d`], the `2N x 9`
/// system `A h = 0` is solved through the SVD, and the result is brought back
/// to pixel coordinates with `H = T2^-1 * H_norm * T1`.
///
/// # Arguments
///
/// * `x1` - The source points.
/// * `x2` - The target points, matched by index.
///
/// # Errors
///
/// * [`HomographyError::MismatchedLengths`] when the slices differ in length.
/// * [`HomographyError::InsufficientData`] for fewer than 4 pairs.
/// * [`HomographyError::DegenerateConfiguration`] when the points do not fix a
///   unique homography (coincident or collinear points) or the estimate is singular.
pub fn homography_dlt(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Homography, HomographyError> {
    if x1.len() != x2.len() {
        return Err(HomographyError::MismatchedLengths {
            src: x1.len(),
            dst: x2.len(),
        });
    }
    if x1.len() < MIN_CORRESPONDENCES {
        return Err(HomographyError::InsufficientData {
            required: MIN_CORRESPONDENCES,
            actual: x1.len(),
        });
    }

    let (x1n, t1) = normalize_points_2d(x1)?;
    let (x2n, t2) = normalize_points_2d(x2)?;

    // construct matrix A
    let n = x1n.len();
    let mut mat_a = faer::Mat::<f64>::zeros(2 * n, 9);
    for (i, (p, q)) in x1n.iter().zip(&x2n).enumerate() {
        let (x, y) = (p[0], p[1]);
        let (u, v) = (q[0], q[1]);

        mat_a.write(2 * i, 0, x);
        mat_a.write(2 * i, 1, y);
        mat_a.write(2 * i, 2, 1.0);
        mat_a.write(2 * i, 6, -u * x);
        mat_a.write(2 * i, 7, -u * y);
        mat_a.write(2 * i, 8, -u);

        mat_a.write(2 * i + 1, 3, x);
        mat_a.write(2 * i + 1, 4, y);
        mat_a.write(2 * i + 1, 5, 1.0);
        mat_a.write(2 * i + 1, 6, -v * x);
        mat_a.write(2 * i + 1, 7, -v * y);
        mat_a.write(2 * i + 1, 8, -v);
    }

    // the singular values are sorted in non-increasing order
    let svd = mat_a.svd();
    let s = svd.s_diagonal();
    let largest = s.read(0);
    let second_smallest = s.read(7);
    if !(second_smallest > RANK_TOLERANCE * largest) {
        return Err(HomographyError::DegenerateConfiguration(format!(
            "null space is not one-dimensional (singular values {largest:e} .. {second_smallest:e})"
        )));
    }

    // null vector: right singular vector of the smallest singular value
    let h = svd.v().col(8);
    let h_norm = [
        [h.read(0), h.read(1), h.read(2)],
        [h.read(3), h.read(4), h.read(5)],
        [h.read(6), h.read(7), h.read(8)],
    ];

    // H = T2^-1 * H_norm * T1
    let t2_inv = linalg::inverse_mat33(&t2).ok_or_else(|| {
        HomographyError::DegenerateConfiguration("singular target normalization".to_string())
    })?;
    let homography = Homography::from_array(linalg::mul_mat33(
        &t2_inv,
        &linalg::mul_mat33(&h_norm, &t1),
    ));

    if homography.is_degenerate() {
        return Err(HomographyError::DegenerateConfiguration(
            "estimated homography is singular".to_string(),
        ));
    }

    Ok(homography.normalized())
}

/// Estimate the homography of a correspondence set with the normalized DLT.
///
/// See [`homography_dlt`].
pub fn estimate_homography_dlt(
    correspondences: &Correspondences,
) -> Result<Homography, HomographyError> {
    homography_dlt(correspondences.src(), correspondences.dst())
}
