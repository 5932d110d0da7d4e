//! Row-major 3x3 matrices and 3-vectors as plain arrays.

/// A row-major 3x3 matrix.
pub type Mat33 = [[f64; 3]; 3];

/// The 3x3 identity matrix.
pub const IDENTITY: Mat33 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Cross product of two 3-vectors.
pub fn cross3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Dot product of two 3-vectors.
pub fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Euclidean norm of a 3-vector.
pub fn norm3(a: &[f64; 3]) -> f64 {
    dot3(a, a).sqrt()
}

/// Determinant of a 3x3 matrix.
pub fn det_mat33(m: &Mat33) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Frobenius norm of a 3x3 matrix.
pub fn frobenius_norm_mat33(m: &Mat33) -> f64 {
    m.iter().flatten().map(|v| v * v).sum::<f64>().sqrt()
}

/// Determinant of `m / ||m||_F`, a scale-free measure of singularity.
///
/// Returns 0 for the zero matrix.
pub fn normalized_det_mat33(m: &Mat33) -> f64 {
    let norm = frobenius_norm_mat33(m);
    if norm == 0.0 {
        return 0.0;
    }
    det_mat33(m) / (norm * norm * norm)
}

/// Inverse of a 3x3 matrix through the adjugate.
///
/// Returns `None` when the determinant is exactly zero or not finite.
pub fn inverse_mat33(m: &Mat33) -> Option<Mat33> {
    let det = det_mat33(m);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;

    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

/// Matrix product `a * b`.
pub fn mul_mat33(a: &Mat33, b: &Mat33) -> Mat33 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

/// Matrix-vector product `m * v`.
pub fn mul_mat33_vec3(m: &Mat33, v: &[f64; 3]) -> [f64; 3] {
    [dot3(&m[0], v), dot3(&m[1], v), dot3(&m[2], v)]
}

/// Transpose of a 3x3 matrix.
pub fn transpose_mat33(m: &Mat33) -> Mat33 {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// Multiply every entry by `s`.
pub fn scale_mat33(m: &Mat33, s: f64) -> Mat33 {
    m.map(|row| row.map(|v| v * s))
}
