use planar_optim::{OptimizerError, ProblemError};

/// Errors raised by the homogeneous primitives.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// The configuration has no well defined answer, e.g. a point at infinity
    /// where a finite point is needed or a line through two identical points.
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),
}

/// Errors raised while applying or estimating a homography.
#[derive(thiserror::Error, Debug)]
pub enum HomographyError {
    /// The matrix is singular or too close to singular to be inverted.
    #[error("Degenerate transform: normalized determinant {0:e} is too small")]
    DegenerateTransform(f64),

    /// Not enough correspondences for the requested estimate.
    #[error("Need at least {required} correspondences, got {actual}")]
    InsufficientData {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// The two sides of a correspondence set have different lengths.
    #[error("Mismatched lengths: {src} source points and {dst} target points")]
    MismatchedLengths {
        /// Number of source points.
        src: usize,
        /// Number of target points.
        dst: usize,
    },

    /// The points do not determine a unique homography.
    #[error("Degenerate configuration: {0}")]
    DegenerateConfiguration(String),

    /// RANSAC did not find a model supported by enough correspondences.
    #[error("No consensus: best model has {best_inliers} inliers, at least {required} needed")]
    NoConsensus {
        /// Size of the largest consensus set found.
        best_inliers: usize,
        /// Minimum consensus size.
        required: usize,
    },

    /// The refinement did not converge.
    #[error("Numerical non-convergence: {0}")]
    NumericalNonConvergence(String),

    /// Homogeneous primitive failure.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Error while building the least squares problem.
    #[error("Refinement problem error: {0}")]
    Problem(#[from] ProblemError),

    /// Error raised by the least squares solver.
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),
}
